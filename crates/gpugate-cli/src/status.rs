//! `gpugate status`: fetch a router's fleet view and render it as a table.

use anyhow::{Context, Result};
use gpugate_router::{BackendStatus, FleetStatus};
use std::fmt::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fetches `GET {base_url}/status`.
pub async fn fetch_status(base_url: &str, timeout: Duration) -> Result<FleetStatus> {
    let url = format!("{}/status", base_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("{} returned {}", url, response.status());
    }

    response
        .json::<FleetStatus>()
        .await
        .with_context(|| format!("Invalid status document from {}", url))
}

fn probe_age(status: &BackendStatus, now_ms: u64) -> String {
    match status.last_probe_ok_ms {
        Some(at) => format!("{}s ago", now_ms.saturating_sub(at) / 1000),
        None => "never".to_string(),
    }
}

/// Renders the fleet as a fixed-width table followed by a summary line.
pub fn render_table(fleet: &FleetStatus) -> String {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let width = fleet
        .backends
        .iter()
        .map(|b| b.address.len())
        .max()
        .unwrap_or(0)
        .max("BACKEND".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:<9}  {:>6}  {:>9}  {:>8}  {:>10}  {:>9}",
        "BACKEND", "HEALTH", "WEIGHT", "IN-FLIGHT", "FAILURES", "LAST OK", "PROBE MS",
        width = width
    );

    for b in &fleet.backends {
        let load = format!("{}/{}", b.in_flight, b.max_concurrency);
        let latency = b
            .last_probe_latency_ms
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<width$}  {:<9}  {:>6}  {:>9}  {:>8}  {:>10}  {:>9}",
            b.address,
            b.health.to_string(),
            b.weight,
            load,
            b.consecutive_failures,
            probe_age(b, now_ms),
            latency,
            width = width
        );
    }

    let _ = write!(
        out,
        "\n{} healthy, {} degraded, {} unhealthy",
        fleet.healthy, fleet.degraded, fleet.unhealthy
    );
    out
}
