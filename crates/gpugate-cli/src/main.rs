//! # gpugate CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run the router
//! gpugate serve -c gpugate.yaml
//!
//! # Same, with the config path from the environment and another bind address
//! GPUGATE_CONFIG=/etc/gpugate.yaml gpugate serve -b 127.0.0.1:9000
//!
//! # Fleet table of a running router
//! gpugate status http://127.0.0.1:8080
//!
//! # Probe every configured backend once (exit status 1 if any failed)
//! gpugate probe -c gpugate.yaml
//!
//! # Check a config file
//! gpugate validate -c gpugate.yaml
//! ```

use anyhow::Result;
use argh::FromArgs;
use gpugate_cli::{resolve_config_path, validate_http_url, CONFIG_ENV};
use gpugate_common::GateConfig;
use gpugate_router::{HttpServer, RequestRouter};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(FromArgs)]
/// gpugate - capacity-aware router for GPU inference backends
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Status(StatusArgs),
    Probe(ProbeArgs),
    Validate(ValidateArgs),
}

/// Arguments for running the router.
///
/// ```bash
/// gpugate serve -c gpugate.yaml -b 0.0.0.0:8080
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run the router
struct ServeArgs {
    /// path to the YAML config file (falls back to $GPUGATE_CONFIG)
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// address to listen on, overriding `bind` from the config
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// never probe backends; health then only changes on dispatch failures
    #[argh(switch, long = "disable-health-check")]
    disable_health_check: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
/// print the fleet status of a running router
struct StatusArgs {
    /// router base URL, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    url: String,

    /// print the raw JSON document instead of a table
    #[argh(switch)]
    json: bool,

    /// request timeout in milliseconds
    #[argh(option, long = "timeout", default = "5000")]
    timeout_ms: u64,
}

/// Arguments for a one-shot probe round.
///
/// Prints a JSON report to stdout and exits with status 1 if any backend
/// failed its probe, so it can stand in for a cron health-check script.
#[derive(FromArgs)]
#[argh(subcommand, name = "probe")]
/// probe every configured backend once
struct ProbeArgs {
    /// path to the YAML config file (falls back to $GPUGATE_CONFIG)
    #[argh(option, short = 'c')]
    config: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "validate")]
/// load and validate a config file
struct ValidateArgs {
    /// path to the YAML config file (falls back to $GPUGATE_CONFIG)
    #[argh(option, short = 'c')]
    config: Option<String>,
}

fn load_config(flag: Option<String>) -> Result<(std::path::PathBuf, GateConfig)> {
    let path = resolve_config_path(flag, std::env::var(CONFIG_ENV).ok())?;
    let config = GateConfig::from_file(&path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    Ok((path, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // status and validate print to stdout for scripts; keep it clean
    if !matches!(cli.command, Commands::Status(_) | Commands::Validate(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::Probe(args) => run_probe(args).await,
        Commands::Validate(args) => run_validate(args),
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let (path, config) = load_config(args.config)?;
    let bind = args.bind.unwrap_or_else(|| config.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", bind, e))?;

    tracing::info!("Starting gpugate from {}", path.display());
    tracing::info!("Backends: {:?}", config.backends.iter().map(|b| &b.address).collect::<Vec<_>>());

    let router = if args.disable_health_check {
        tracing::info!("Health checking disabled");
        RequestRouter::from_config_unmonitored(&config).await?
    } else {
        RequestRouter::from_config(&config).await?
    };

    HttpServer::new(Arc::new(router))
        .with_config_path(path)
        .with_body_limit(config.max_request_bytes)
        .with_retry_after(config.probe_interval_seconds)
        .run(addr)
        .await?;

    Ok(())
}

async fn run_status(args: StatusArgs) -> Result<()> {
    validate_http_url(&args.url, "router URL")?;
    let fleet =
        gpugate_cli::status::fetch_status(&args.url, Duration::from_millis(args.timeout_ms)).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&fleet)?);
    } else {
        println!("{}", gpugate_cli::status::render_table(&fleet));
    }
    Ok(())
}

async fn run_probe(args: ProbeArgs) -> Result<()> {
    let (_, config) = load_config(args.config)?;
    let summary = gpugate_cli::probe::probe_once(&config).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if !summary.all_ok() {
        for failure in summary.backends.iter().filter_map(|r| r.failure()) {
            tracing::warn!("{}", failure);
        }
        tracing::warn!("{} of {} backends failed their probe", summary.failed, summary.backends.len());
        std::process::exit(1);
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let (path, config) = load_config(args.config)?;
    print!("{}", describe_config(&path, &config));
    Ok(())
}

fn describe_config(path: &Path, config: &GateConfig) -> String {
    let weight: u64 = config.backends.iter().map(|b| b.weight as u64).sum();
    let capacity: u64 = config.backends.iter().map(|b| b.max_concurrency as u64).sum();

    let mut out = format!(
        "{}: OK\n  {} backend(s), total weight {}, total capacity {}\n",
        path.display(),
        config.backends.len(),
        weight,
        capacity
    );
    for b in &config.backends {
        out.push_str(&format!(
            "  - {} (weight {}, max_concurrency {})\n",
            b.address, b.weight, b.max_concurrency
        ));
    }
    out.push_str(&format!(
        "  probe every {}s (timeout {}s, unhealthy after {} failures)\n",
        config.probe_interval_seconds, config.probe_timeout_seconds, config.failure_threshold_unhealthy
    ));
    out.push_str(&format!(
        "  dispatch timeout {}s, {} retries\n",
        config.dispatch_timeout_seconds, config.max_retries
    ));
    out
}
