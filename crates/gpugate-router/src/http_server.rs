//! HTTP Ingress Server
//!
//! Thin axum shim in front of [`RequestRouter`]. Operational endpoints are
//! served locally; every other request is forwarded opaquely to a backend.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /health` | 200 while at least one backend is selectable, else 503 |
//! | `GET /status` | [`FleetStatus`] as JSON |
//! | `GET /metrics` | [`MetricsSnapshot`](gpugate_metrics::MetricsSnapshot) plus server info |
//! | `POST /admin/reload` | re-read the config file and swap the backend set |
//! | anything else | routed to a backend |

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
};
use bytes::Bytes;
use gpugate_common::{EditRequest, GateConfig, GateError, RoutedResponse};
use gpugate_metrics::ServerInfo;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dispatch::is_forwardable_header;
use crate::router::{FleetStatus, RequestRouter};

/// Caller-supplied response budget, in milliseconds.
pub const TIMEOUT_HEADER: &str = "x-gpugate-timeout-ms";
pub const BACKEND_HEADER: &str = "x-gpugate-backend";
pub const ATTEMPTS_HEADER: &str = "x-gpugate-attempts";
pub const LATENCY_HEADER: &str = "x-gpugate-latency-ms";

struct ServerState {
    router: Arc<RequestRouter>,
    config_path: Option<PathBuf>,
    retry_after_secs: u64,
}

/// HTTP server for the router.
pub struct HttpServer {
    router: Arc<RequestRouter>,
    config_path: Option<PathBuf>,
    body_limit: usize,
    retry_after_secs: u64,
}

impl HttpServer {
    pub fn new(router: Arc<RequestRouter>) -> Self {
        let defaults = GateConfig::default();
        Self {
            router,
            config_path: None,
            body_limit: defaults.max_request_bytes,
            retry_after_secs: defaults.probe_interval_seconds,
        }
    }

    /// Enables `POST /admin/reload` against this file.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Value of `Retry-After` on 503 responses; one probe interval is when
    /// backend health can next change.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = secs;
        self
    }

    /// Builds the axum application.
    pub fn app(self) -> axum::Router {
        let state = Arc::new(ServerState {
            router: self.router,
            config_path: self.config_path,
            retry_after_secs: self.retry_after_secs,
        });

        axum::Router::new()
            .route("/health", get(router_health))
            .route("/status", get(fleet_status))
            .route("/metrics", get(metrics))
            .route("/admin/reload", post(reload))
            .fallback(forward)
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.body_limit))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Binds `addr` and serves until Ctrl-C or SIGTERM.
    pub async fn run(self, addr: SocketAddr) -> Result<(), GateError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GateError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), GateError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener
            .local_addr()
            .map_err(|e| GateError::Transport(format!("Failed to get local addr: {}", e)))?;
        info!("gpugate listening on {}", local);

        axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GateError::Transport(format!("Server error: {}", e)))?;

        info!("gpugate stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}

async fn router_health(State(state): State<Arc<ServerState>>) -> Response {
    let fleet = state.router.fleet_status();
    let status = if fleet.selectable() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if status == StatusCode::OK { "ok" } else { "unavailable" },
        "healthy": fleet.healthy,
        "degraded": fleet.degraded,
        "unhealthy": fleet.unhealthy,
    });
    (status, Json(body)).into_response()
}

async fn fleet_status(State(state): State<Arc<ServerState>>) -> Json<FleetStatus> {
    Json(state.router.fleet_status())
}

async fn metrics(State(state): State<Arc<ServerState>>) -> Response {
    let snapshot = state.router.metrics().snapshot();
    let server = ServerInfo::new(snapshot.uptime_ms);
    Json(json!({ "server": server, "metrics": snapshot })).into_response()
}

async fn reload(State(state): State<Arc<ServerState>>) -> Response {
    let Some(path) = state.config_path.as_ref() else {
        return error_body(
            StatusCode::CONFLICT,
            "reload_unavailable",
            "server was started without a config file",
        );
    };

    let result = GateConfig::from_file(path).and_then(|config| {
        let count = config.backends.len();
        state.router.reload(config.backends).map(|_| count)
    });

    match result {
        Ok(count) => {
            info!("Reloaded {} backends from {}", count, path.display());
            Json(json!({ "reloaded": true, "backends": count })).into_response()
        }
        Err(e) => {
            warn!("Reload from {} rejected: {}", path.display(), e);
            error_body(StatusCode::BAD_REQUEST, e.error_type(), &e.to_string())
        }
    }
}

/// Everything that is not an operational endpoint goes to a backend.
async fn forward(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut request = EditRequest::new(method.as_str(), path, body);
    for (name, value) in headers.iter() {
        // the budget header is for gpugate only
        if name.as_str() == TIMEOUT_HEADER || !is_forwardable_header(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if let Some(ms) = headers
        .get(TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    match state.router.route(&request).await {
        Ok(routed) => routed_response(routed),
        Err(e) => gate_error_response(&e, state.retry_after_secs),
    }
}

fn routed_response(routed: RoutedResponse) -> Response {
    let status = StatusCode::from_u16(routed.reply.status).unwrap_or(StatusCode::OK);
    let mut response = Response::new(Body::from(routed.reply.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &routed.reply.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    if let Ok(v) = HeaderValue::from_str(&routed.meta.backend) {
        headers.insert(BACKEND_HEADER, v);
    }
    headers.insert(ATTEMPTS_HEADER, HeaderValue::from(routed.meta.attempts));
    headers.insert(LATENCY_HEADER, HeaderValue::from(routed.meta.latency_ms));
    response
}

/// Structured error body; 503 with `Retry-After` for transient errors.
fn gate_error_response(err: &GateError, retry_after_secs: u64) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "error": {
            "type": err.error_type(),
            "message": err.to_string(),
            "transient": err.is_transient(),
            "attempts": err.attempts(),
            "trail": err.trail(),
        }
    });

    let mut response = (status, Json(body)).into_response();
    if err.is_transient() {
        response
            .headers_mut()
            .insert("retry-after", HeaderValue::from(retry_after_secs));
    }
    response
}

fn error_body(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "type": kind, "message": message } })),
    )
        .into_response()
}
