use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use gpugate_common::{FailureReason, GateConfig, GateError};
use gpugate_metrics::MetricsRegistry;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{HealthState, HealthTransition};
use crate::dispatch::{http_client, HttpClient};
use crate::registry::BackendRegistry;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Time between the start of two probe rounds
    pub interval: Duration,
    /// Budget for a single probe; must be shorter than `interval`
    pub timeout: Duration,
    /// Consecutive failures after which a backend becomes unhealthy
    pub failure_threshold: u32,
    /// Path requested on every backend
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
            failure_threshold: 3,
            path: "/health".to_string(),
        }
    }
}

impl From<&GateConfig> for HealthCheckConfig {
    fn from(config: &GateConfig) -> Self {
        Self {
            interval: config.probe_interval(),
            timeout: config.probe_timeout(),
            failure_threshold: config.failure_threshold_unhealthy,
            path: config.health_path.clone(),
        }
    }
}

/// A liveness check against one backend.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<(), FailureReason>;
}

/// `GET http://{address}{path}`; any 2xx is healthy.
#[derive(Clone)]
pub struct HttpProbe {
    client: HttpClient,
    path: String,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<(), FailureReason> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", address, self.path))
            .body(Full::new(Bytes::new()))
            .map_err(|e| FailureReason::Transport(format!("Failed to build probe: {}", e)))?;

        let exchange = async {
            let response = self.client.request(request).await.map_err(|e| {
                if e.is_connect() {
                    FailureReason::Connect(e.to_string())
                } else {
                    FailureReason::Transport(e.to_string())
                }
            })?;
            let status = response.status();
            // drain so the pooled connection can be reused
            let _ = response.into_body().collect().await;
            if status.is_success() {
                Ok(())
            } else {
                Err(FailureReason::Status(status.as_u16()))
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| FailureReason::Timeout(timeout.as_millis() as u64))?
    }
}

/// Outcome of probing one backend.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub address: String,
    pub ok: bool,
    pub latency_ms: u64,
    pub error: Option<FailureReason>,
    /// Health state after applying this result
    pub health: HealthState,
    pub consecutive_failures: u32,
    pub transition: Option<HealthTransition>,
}

impl ProbeReport {
    /// The failed probe as an error, `None` when the probe passed.
    pub fn failure(&self) -> Option<GateError> {
        self.error
            .clone()
            .map(|reason| GateError::probe_failure(&self.address, reason))
    }
}

/// Periodically probes every registered backend and applies the results.
///
/// The registry is read at the start of each round, so a reload is picked up
/// on the next tick without restarting the monitor.
pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    probe: Arc<dyn Probe>,
    config: HealthCheckConfig,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<BackendRegistry>,
        probe: Arc<dyn Probe>,
        config: HealthCheckConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Latest known state of a backend. Never triggers a probe.
    pub fn current_health(&self, address: &str) -> Option<HealthState> {
        self.registry.get(address).map(|b| b.health())
    }

    /// Starts the monitor task. The first round runs immediately.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Health monitor started (interval {:?}, timeout {:?}, threshold {})",
            self.config.interval, self.config.timeout, self.config.failure_threshold
        );

        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }

    /// Runs one probe round over the current backend set.
    ///
    /// All probes run concurrently and each result is applied as soon as it
    /// arrives, so one slow backend never holds back another's update.
    pub async fn check_all(&self) -> Vec<ProbeReport> {
        let backends = self.registry.list();
        let timeout = self.config.timeout;
        let probe = &self.probe;

        let mut pending: FuturesUnordered<_> = backends
            .iter()
            .cloned()
            .map(|backend| async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, probe.probe(backend.address(), timeout)).await {
                    Ok(result) => result,
                    Err(_) => Err(FailureReason::Timeout(timeout.as_millis() as u64)),
                };
                (backend, result, started.elapsed())
            })
            .collect();

        let mut reports = Vec::with_capacity(backends.len());
        while let Some((backend, result, latency)) = pending.next().await {
            let ok = result.is_ok();
            if let Some(metrics) = &self.metrics {
                if self.registry.get(backend.address()).is_some() {
                    metrics.record_probe(backend.address(), latency, ok);
                }
            }

            let transition = match &result {
                Ok(()) => backend.record_probe_success(latency),
                Err(reason) => {
                    debug!("{}", GateError::probe_failure(backend.address(), reason.clone()));
                    backend.record_probe_failure(latency, self.config.failure_threshold)
                }
            };

            if let Some(t) = &transition {
                log_transition(t, backend.consecutive_failures(), result.as_ref().err());
            }

            reports.push(ProbeReport {
                address: backend.address().to_string(),
                ok,
                latency_ms: latency.as_millis() as u64,
                error: result.err(),
                health: backend.health(),
                consecutive_failures: backend.consecutive_failures(),
                transition,
            });
        }

        reports
    }
}

pub(crate) fn log_transition(
    transition: &HealthTransition,
    failures: u32,
    reason: Option<&FailureReason>,
) {
    if transition.is_promotion() {
        info!(
            "Backend {} promoted {} -> {}",
            transition.address, transition.from, transition.to
        );
    } else {
        warn!(
            "Backend {} demoted {} -> {} after {} consecutive failure(s): {}",
            transition.address,
            transition.from,
            transition.to,
            failures,
            reason.map(|r| r.to_string()).unwrap_or_else(|| "unknown error".to_string())
        );
    }
}
