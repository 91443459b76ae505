//! HTTP Ingress Integration Tests
//!
//! Runs the real ingress server, HTTP dispatcher and HTTP probes against mock
//! inference backends on loopback ports.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gpugate_common::BackendSpec;
use gpugate_router::{
    BackendRegistry, HealthCheckConfig, HealthMonitor, HealthState, HttpDispatcher, HttpProbe,
    HttpServer, RequestRouter, RetryConfig,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

// ============================================================================
// Mock inference backend
// ============================================================================

#[derive(Clone)]
struct BackendControl {
    name: String,
    /// Status returned for inference requests
    status: Arc<AtomicU16>,
    /// Whether `/health` answers 200
    healthy: Arc<AtomicBool>,
    /// Artificial latency for inference requests
    delay_ms: Arc<AtomicU64>,
}

struct MockBackend {
    addr: SocketAddr,
    control: BackendControl,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    async fn start(name: &str) -> Self {
        let control = BackendControl {
            name: name.to_string(),
            status: Arc::new(AtomicU16::new(200)),
            healthy: Arc::new(AtomicBool::new(true)),
            delay_ms: Arc::new(AtomicU64::new(0)),
        };

        async fn health(State(control): State<BackendControl>) -> StatusCode {
            if control.healthy.load(Ordering::SeqCst) {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }

        async fn infer(
            State(control): State<BackendControl>,
            uri: Uri,
            headers: HeaderMap,
            body: String,
        ) -> Response {
            let delay = control.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let status = StatusCode::from_u16(control.status.load(Ordering::SeqCst))
                .unwrap_or(StatusCode::OK);
            let request_id = headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            (
                status,
                Json(json!({
                    "backend": control.name,
                    "path": uri.to_string(),
                    "request_id": request_id,
                    "saw_timeout_header": headers.contains_key("x-gpugate-timeout-ms"),
                    "body": body,
                })),
            )
                .into_response()
        }

        let app = Router::new()
            .route("/health", get(health))
            .fallback(infer)
            .with_state(control.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            control,
            _handle: handle,
        }
    }

    fn address(&self) -> String {
        self.addr.to_string()
    }

    fn set_status(&self, status: u16) {
        self.control.status.store(status, Ordering::SeqCst);
    }

    fn set_healthy(&self, healthy: bool) {
        self.control.healthy.store(healthy, Ordering::SeqCst);
    }

    fn set_delay(&self, delay: Duration) {
        self.control
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

// ============================================================================
// Gateway under test
// ============================================================================

struct Gateway {
    url: String,
    router: Arc<RequestRouter>,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Gateway {
    async fn start(specs: Vec<BackendSpec>, config_path: Option<std::path::PathBuf>) -> Self {
        let registry = Arc::new(BackendRegistry::new(specs));
        let monitor = HealthMonitor::new(
            registry.clone(),
            Arc::new(HttpProbe::new("/health")),
            HealthCheckConfig {
                interval: Duration::from_millis(100),
                timeout: Duration::from_millis(50),
                failure_threshold: 2,
                path: "/health".to_string(),
            },
        );
        let router = Arc::new(
            RequestRouter::new(
                registry,
                Arc::new(HttpDispatcher::new()),
                RetryConfig {
                    max_retries: 2,
                    dispatch_timeout: Duration::from_secs(2),
                },
                2,
            )
            .with_health_monitor(monitor.spawn()),
        );

        let mut server = HttpServer::new(router.clone()).with_retry_after(1);
        if let Some(path) = config_path {
            server = server.with_config_path(path);
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            router,
            client: reqwest::Client::new(),
            shutdown: Some(tx),
            handle,
        }
    }

    async fn post(&self, path: &str, body: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.url, path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.url, path))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Polls until `check` holds or two seconds pass.
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn test_forwards_request_to_backend() {
    let a = MockBackend::start("a").await;
    let gateway = Gateway::start(vec![BackendSpec::new(a.address(), 1, 4)], None).await;

    let response = gateway
        .client
        .post(format!("{}/v1/images/edits?steps=20", gateway.url))
        .header("content-type", "application/json")
        .header("x-request-id", "req-42")
        .body(r#"{"prompt":"a cat"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-gpugate-backend"], a.address().as_str());
    assert_eq!(response.headers()["x-gpugate-attempts"], "1");
    assert!(response.headers().contains_key("x-gpugate-latency-ms"));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["backend"], "a");
    assert_eq!(body["path"], "/v1/images/edits?steps=20");
    assert_eq!(body["request_id"], "req-42");
    assert_eq!(body["body"], r#"{"prompt":"a cat"}"#);

    gateway.stop().await;
}

#[tokio::test]
async fn test_failover_between_backends() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    a.set_status(500);

    let gateway = Gateway::start(
        vec![
            BackendSpec::new(a.address(), 5, 4),
            BackendSpec::new(b.address(), 1, 4),
        ],
        None,
    )
    .await;

    let response = gateway.post("/v1/images/edits", "{}").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-gpugate-attempts"], "2");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["backend"], "b");

    let snapshot = gateway.router.metrics().snapshot();
    assert_eq!(snapshot.backends[&a.address()].dispatch_failures, 1);
    assert_eq!(snapshot.backends[&b.address()].dispatch_successes, 1);

    gateway.stop().await;
}

#[tokio::test]
async fn test_exhausted_returns_structured_error() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    a.set_status(500);
    b.set_status(502);

    let gateway = Gateway::start(
        vec![
            BackendSpec::new(a.address(), 1, 4),
            BackendSpec::new(b.address(), 1, 4),
        ],
        None,
    )
    .await;

    let response = gateway.post("/v1/images/edits", "{}").await;
    assert_eq!(response.status(), 502);
    assert!(response.headers().get("retry-after").is_none());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "retry_exhausted");
    assert_eq!(body["error"]["transient"], false);
    assert_eq!(body["error"]["attempts"], 2);

    let trail = body["error"]["trail"].as_array().unwrap();
    assert_eq!(trail.len(), 2);
    for entry in trail {
        assert_eq!(entry["reason"]["kind"], "status");
    }

    gateway.stop().await;
}

#[tokio::test]
async fn test_caller_budget_header() {
    let a = MockBackend::start("a").await;
    a.set_delay(Duration::from_millis(1500));
    let gateway = Gateway::start(vec![BackendSpec::new(a.address(), 1, 4)], None).await;

    let response = gateway
        .client
        .post(format!("{}/v1/images/edits", gateway.url))
        .header("x-gpugate-timeout-ms", "100")
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["trail"][0]["reason"]["kind"], "timeout");

    gateway.stop().await;
}

#[tokio::test]
async fn test_budget_header_not_forwarded() {
    let a = MockBackend::start("a").await;
    let gateway = Gateway::start(vec![BackendSpec::new(a.address(), 1, 4)], None).await;

    let response = gateway
        .client
        .post(format!("{}/v1/images/edits", gateway.url))
        .header("x-gpugate-timeout-ms", "5000")
        .header("x-request-id", "req-7")
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["saw_timeout_header"], false);
    assert_eq!(body["request_id"], "req-7");

    gateway.stop().await;
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_unhealthy_fleet_then_recovery() {
    let a = MockBackend::start("a").await;
    a.set_healthy(false);
    let gateway = Gateway::start(vec![BackendSpec::new(a.address(), 1, 4)], None).await;

    let router = gateway.router.clone();
    let address = a.address();
    assert!(
        eventually(|| router.current_health(&address) == Some(HealthState::Unhealthy)).await,
        "backend never became unhealthy"
    );

    let (status, health) = gateway.get_json("/health").await;
    assert_eq!(status, 503);
    assert_eq!(health["unhealthy"], 1);

    let response = gateway.post("/v1/images/edits", "{}").await;
    assert_eq!(response.status(), 503);
    assert_eq!(response.headers()["retry-after"], "1");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "no_backend_available");
    assert_eq!(body["error"]["transient"], true);
    assert_eq!(body["error"]["attempts"], 0);

    // only a probe brings it back
    a.set_healthy(true);
    assert!(
        eventually(|| router.current_health(&address) == Some(HealthState::Healthy)).await,
        "backend never recovered"
    );

    let (status, _) = gateway.get_json("/health").await;
    assert_eq!(status, 200);
    let response = gateway.post("/v1/images/edits", "{}").await;
    assert_eq!(response.status(), 200);

    gateway.stop().await;
}

#[tokio::test]
async fn test_status_and_metrics_endpoints() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;
    let gateway = Gateway::start(
        vec![
            BackendSpec::new(a.address(), 2, 4),
            BackendSpec::new(b.address(), 1, 2),
        ],
        None,
    )
    .await;

    gateway.post("/v1/images/edits", "{}").await;

    let (status, fleet) = gateway.get_json("/status").await;
    assert_eq!(status, 200);
    assert_eq!(fleet["healthy"], 2);
    let backends = fleet["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0]["address"], a.address().as_str());
    assert_eq!(backends[0]["weight"], 2);
    assert_eq!(backends[1]["max_concurrency"], 2);

    let (status, metrics) = gateway.get_json("/metrics").await;
    assert_eq!(status, 200);
    assert_eq!(metrics["server"]["name"], "gpugate");
    assert_eq!(metrics["metrics"]["total_requests"], 1);
    assert_eq!(metrics["metrics"]["succeeded_requests"], 1);

    gateway.stop().await;
}

// ============================================================================
// Reload
// ============================================================================

#[tokio::test]
async fn test_admin_reload() {
    let a = MockBackend::start("a").await;
    let b = MockBackend::start("b").await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gpugate.yaml");
    std::fs::write(
        &path,
        format!("backends:\n  - address: {}\n    max_concurrency: 2\n", a.address()),
    )
    .unwrap();

    let gateway = Gateway::start(vec![BackendSpec::new(a.address(), 1, 2)], Some(path.clone())).await;

    std::fs::write(
        &path,
        format!(
            "backends:\n  - address: {}\n    weight: 1\n    max_concurrency: 2\n",
            b.address()
        ),
    )
    .unwrap();

    let response = gateway
        .client
        .post(format!("{}/admin/reload", gateway.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["backends"], 1);

    let response = gateway.post("/v1/images/edits", "{}").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["backend"], "b");

    // a broken file is rejected and the current set stays
    std::fs::write(&path, "backends: []\n").unwrap();
    let response = gateway
        .client
        .post(format!("{}/admin/reload", gateway.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(gateway.router.registry().addresses(), vec![b.address()]);

    gateway.stop().await;
}

#[tokio::test]
async fn test_reload_without_config_file() {
    let a = MockBackend::start("a").await;
    let gateway = Gateway::start(vec![BackendSpec::new(a.address(), 1, 2)], None).await;

    let response = gateway
        .client
        .post(format!("{}/admin/reload", gateway.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    gateway.stop().await;
}
