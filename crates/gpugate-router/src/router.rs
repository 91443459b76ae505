use gpugate_common::config::validate_backends;
use gpugate_common::{
    AttemptFailure, BackendSpec, EditRequest, FailureReason, GateConfig, GateError, RequestId,
    Result, RouteMetadata, RoutedResponse,
};
use gpugate_metrics::MetricsRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendStatus, HealthState};
use crate::capacity::{AdmissionSlot, CapacityStats, CapacityTracker};
use crate::dispatch::{Dispatcher, HttpDispatcher};
use crate::health_checker::{log_transition, HealthCheckConfig, HealthMonitor, HttpProbe};
use crate::registry::BackendRegistry;
use crate::selection::SelectionPolicy;

/// Retry and timeout policy for dispatch attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    ///
    /// Total attempts = max_retries + 1
    /// Default: 2
    pub max_retries: u32,
    /// Upper bound for a single dispatch attempt
    ///
    /// Inference is slow, so this is generous.
    /// Default: 30s
    pub dispatch_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&GateConfig> for RetryConfig {
    fn from(config: &GateConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            dispatch_timeout: config.dispatch_timeout(),
        }
    }
}

/// Where a request is in its routing lifecycle.
///
/// ```text
/// Received -> Selecting -> Dispatched -> Succeeded
///                 ^            |
///                 |            v
///                 +------- Retrying -> Exhausted
///          Selecting -----------------> Exhausted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Selecting,
    Dispatched,
    Retrying,
    Succeeded,
    Exhausted,
}

impl RequestState {
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Selecting)
                | (Selecting, Dispatched)
                | (Selecting, Exhausted)
                | (Dispatched, Succeeded)
                | (Dispatched, Retrying)
                | (Retrying, Selecting)
                | (Retrying, Exhausted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Exhausted)
    }
}

/// Per-request routing state: attempts so far, backends ruled out and why.
#[derive(Debug)]
pub struct RequestLifecycle {
    id: RequestId,
    state: RequestState,
    attempts: u32,
    excluded: Vec<String>,
    trail: Vec<AttemptFailure>,
    started: Instant,
    deadline: Option<Instant>,
}

impl RequestLifecycle {
    pub fn new(request: &EditRequest) -> Self {
        let started = Instant::now();
        Self {
            id: request.id,
            state: RequestState::Received,
            attempts: 0,
            excluded: Vec::new(),
            trail: Vec::new(),
            started,
            deadline: request.timeout.map(|t| started + t),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Backends that failed this request, in the order they failed.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn trail(&self) -> &[AttemptFailure] {
        &self.trail
    }

    pub fn is_excluded(&self, address: &str) -> bool {
        self.excluded.iter().any(|a| a == address)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn transition(&mut self, next: RequestState) {
        if !self.state.can_transition_to(next) {
            error!(
                "Request {} made an invalid transition {:?} -> {:?}",
                self.id, self.state, next
            );
        }
        debug!("Request {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Remaining caller budget, `None` when the caller set no budget.
    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn budget_spent(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// Timeout for the next attempt: the dispatch timeout, capped by whatever
    /// is left of the caller's budget.
    fn attempt_timeout(&self, dispatch_timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(dispatch_timeout),
            None => dispatch_timeout,
        }
    }

    fn record_failure(&mut self, backend: &Backend, reason: FailureReason) -> &AttemptFailure {
        if !self.is_excluded(backend.address()) {
            self.excluded.push(backend.address().to_string());
        }
        self.trail.push(AttemptFailure {
            backend: backend.address().to_string(),
            attempt: self.attempts,
            reason,
            consecutive_failures: backend.consecutive_failures(),
        });
        &self.trail[self.trail.len() - 1]
    }
}

/// Fleet-wide view: every backend's status plus counts per health state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub backends: Vec<BackendStatus>,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

impl FleetStatus {
    pub fn from_backends(backends: Vec<BackendStatus>) -> Self {
        let count = |state: HealthState| backends.iter().filter(|b| b.health == state).count();
        Self {
            healthy: count(HealthState::Healthy),
            degraded: count(HealthState::Degraded),
            unhealthy: count(HealthState::Unhealthy),
            backends,
        }
    }

    /// Backends that selection may still choose.
    pub fn selectable(&self) -> usize {
        self.healthy + self.degraded
    }
}

/// gpugate request router.
///
/// Accepts opaque requests and forwards each to one backend of the fleet:
///
/// 1. **Selection**: weighted round-robin over the least-loaded backends of
///    the best available health tier
/// 2. **Admission**: an atomic in-flight slot on the chosen backend, held for
///    exactly the duration of the attempt
/// 3. **Dispatch**: bounded by the dispatch timeout and the caller's budget
/// 4. **Failover**: a failed backend is excluded for the rest of the request
///    and another one is tried, up to `max_retries` more times
///
/// Every request ends in a [`RoutedResponse`], [`GateError::NoBackendAvailable`]
/// (nothing was selectable, try again later) or [`GateError::RetryExhausted`]
/// (every attempted backend failed, with the per-attempt trail).
pub struct RequestRouter {
    registry: Arc<BackendRegistry>,
    selection: SelectionPolicy,
    capacity: Arc<CapacityTracker>,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: Arc<MetricsRegistry>,
    retry: RetryConfig,
    failure_threshold: u32,
    /// Background health monitor, aborted when the router is dropped
    health_monitor: Option<tokio::task::JoinHandle<()>>,
}

impl RequestRouter {
    /// Creates a router from explicit parts. No health monitor is started.
    pub fn new(
        registry: Arc<BackendRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        retry: RetryConfig,
        failure_threshold: u32,
    ) -> Self {
        Self {
            registry,
            selection: SelectionPolicy::new(),
            capacity: Arc::new(CapacityTracker::new()),
            dispatcher,
            metrics: Arc::new(MetricsRegistry::new()),
            retry,
            failure_threshold,
            health_monitor: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Ties a running health monitor to this router's lifetime.
    pub fn with_health_monitor(mut self, handle: tokio::task::JoinHandle<()>) -> Self {
        if let Some(previous) = self.health_monitor.replace(handle) {
            previous.abort();
        }
        self
    }

    /// Builds the production router: HTTP dispatch plus a background HTTP
    /// health monitor on the configured interval.
    pub async fn from_config(config: &GateConfig) -> Result<Self> {
        let router = Self::from_config_unmonitored(config).await?;

        let monitor = HealthMonitor::new(
            router.registry.clone(),
            Arc::new(HttpProbe::new(config.health_path.clone())),
            HealthCheckConfig::from(config),
        )
        .with_metrics(router.metrics.clone());
        let handle = monitor.spawn();

        info!(
            "Router initialized with {} backends and health checking",
            router.registry.len()
        );
        Ok(router.with_health_monitor(handle))
    }

    /// Like [`from_config`](Self::from_config) but without background probing;
    /// backends then only change health through dispatch failures.
    pub async fn from_config_unmonitored(config: &GateConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(BackendRegistry::new(config.backends.clone()));
        Ok(Self::new(
            registry,
            Arc::new(HttpDispatcher::new()),
            RetryConfig::from(config),
            config.failure_threshold_unhealthy,
        ))
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn capacity_stats(&self) -> CapacityStats {
        self.capacity.stats()
    }

    /// Latest known health of a backend. Never probes.
    pub fn current_health(&self, address: &str) -> Option<HealthState> {
        self.registry.get(address).map(|b| b.health())
    }

    pub fn fleet_status(&self) -> FleetStatus {
        FleetStatus::from_backends(self.registry.list().iter().map(|b| b.status()).collect())
    }

    /// Validates and atomically swaps in a new backend set.
    pub fn reload(&self, specs: Vec<BackendSpec>) -> Result<()> {
        validate_backends(&specs)?;
        let addresses: Vec<String> = specs.iter().map(|s| s.address.clone()).collect();
        self.registry.reload(specs);
        self.selection.reset();
        self.metrics.retain_backends(&addresses);
        Ok(())
    }

    /// Routes one request to completion.
    pub async fn route(&self, request: &EditRequest) -> Result<RoutedResponse> {
        self.metrics.record_request_received();
        let mut lifecycle = RequestLifecycle::new(request);
        lifecycle.transition(RequestState::Selecting);

        loop {
            let slot = match self.acquire(&lifecycle) {
                Ok(slot) => slot,
                Err(err) => {
                    lifecycle.transition(RequestState::Exhausted);
                    return Err(self.fail(lifecycle, err));
                }
            };

            let backend = Arc::clone(slot.backend());
            lifecycle.transition(RequestState::Dispatched);
            lifecycle.attempts += 1;

            let timeout = lifecycle.attempt_timeout(self.retry.dispatch_timeout);
            let capped_by_caller = timeout < self.retry.dispatch_timeout;
            let started = Instant::now();

            let outcome = match tokio::time::timeout(
                timeout,
                self.dispatcher.dispatch(backend.address(), request, timeout),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(FailureReason::Timeout(timeout.as_millis() as u64)),
            };
            let elapsed = started.elapsed();
            drop(slot);

            // a reload may have removed the backend while this attempt ran
            if self.registry.get(backend.address()).is_some() {
                self.metrics
                    .record_dispatch(backend.address(), elapsed, outcome.is_ok());
            }

            match outcome {
                Ok(reply) => {
                    backend.record_dispatch_success();
                    lifecycle.transition(RequestState::Succeeded);

                    let latency = lifecycle.elapsed();
                    self.metrics.record_request_succeeded(latency);
                    debug!(
                        "Request {} served by {} in {:?} after {} attempt(s)",
                        request.id,
                        backend.address(),
                        latency,
                        lifecycle.attempts
                    );

                    return Ok(RoutedResponse {
                        reply,
                        meta: RouteMetadata {
                            backend: backend.address().to_string(),
                            latency_ms: latency.as_millis() as u64,
                            attempts: lifecycle.attempts,
                        },
                    });
                }
                Err(reason) => {
                    // A timeout forced by the caller's own short budget says
                    // nothing about the backend's health.
                    let caller_timeout =
                        capped_by_caller && matches!(reason, FailureReason::Timeout(_));
                    if !caller_timeout {
                        if let Some(t) = backend.record_failure(self.failure_threshold) {
                            log_transition(&t, backend.consecutive_failures(), Some(&reason));
                        }
                    }

                    let failure = lifecycle.record_failure(&backend, reason).to_error();
                    warn!(
                        "Request {} attempt {}/{}: {}",
                        request.id,
                        lifecycle.attempts,
                        self.retry.max_retries + 1,
                        failure
                    );
                    lifecycle.transition(RequestState::Retrying);

                    if lifecycle.attempts > self.retry.max_retries || lifecycle.budget_spent() {
                        lifecycle.transition(RequestState::Exhausted);
                        return Err(self.exhausted(lifecycle));
                    }

                    self.metrics.record_retry();
                    lifecycle.transition(RequestState::Selecting);
                }
            }
        }
    }

    /// Selects a backend and reserves a slot on it.
    ///
    /// Selection works on a snapshot, so another request can fill the chosen
    /// backend first. Such a backend is skipped for this round only: it is not
    /// excluded from the request and no attempt is counted.
    fn acquire(&self, lifecycle: &RequestLifecycle) -> Result<AdmissionSlot> {
        let backends = self.registry.list();
        let mut lost_race: Vec<String> = Vec::new();

        loop {
            let backend = self.selection.select(&backends, |address| {
                lifecycle.is_excluded(address) || lost_race.iter().any(|a| a == address)
            })?;

            match self.capacity.admit(&backend) {
                Ok(slot) => return Ok(slot),
                Err(denied) => {
                    debug!("Request {}: {}, reselecting", lifecycle.id, denied);
                    self.metrics.record_admission_denied(backend.address());
                    lost_race.push(backend.address().to_string());
                }
            }
        }
    }

    /// Selection came up empty. With no attempt made, nothing has actually
    /// failed and the caller is told to come back later.
    fn fail(&self, lifecycle: RequestLifecycle, cause: GateError) -> GateError {
        if lifecycle.attempts == 0 {
            self.metrics.record_request_unavailable();
            warn!("Request {} rejected: {}", lifecycle.id, cause);
            return cause;
        }
        self.exhausted(lifecycle)
    }

    fn exhausted(&self, lifecycle: RequestLifecycle) -> GateError {
        self.metrics.record_request_exhausted(lifecycle.elapsed());
        warn!(
            "Request {} exhausted after {} attempt(s) on {:?}",
            lifecycle.id, lifecycle.attempts, lifecycle.excluded
        );
        GateError::RetryExhausted {
            attempts: lifecycle.attempts,
            trail: lifecycle.trail,
        }
    }
}

impl Drop for RequestRouter {
    fn drop(&mut self) {
        if let Some(handle) = self.health_monitor.take() {
            handle.abort();
        }
    }
}
