use gpugate_common::BackendSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime};

/// Health classification of a backend.
///
/// Ordered from best to worst so that demotion is a `max` and promotion is a
/// reset to `Healthy`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy = 0,
    /// Selectable, but only when no healthy backend has capacity
    Degraded = 1,
    /// Never selected
    Unhealthy = 2,
}

impl HealthState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HealthState::Healthy,
            1 => HealthState::Degraded,
            _ => HealthState::Unhealthy,
        }
    }

    pub fn is_selectable(self) -> bool {
        self != HealthState::Unhealthy
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// A change of health state, reported to the caller that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthTransition {
    pub address: String,
    pub from: HealthState,
    pub to: HealthState,
}

impl HealthTransition {
    pub fn is_promotion(&self) -> bool {
        self.to < self.from
    }
}

/// Read-only view of one backend, as consumed by the selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateView<'a> {
    pub address: &'a str,
    pub weight: u32,
    pub max_concurrency: u32,
    pub in_flight: u32,
    pub health: HealthState,
}

/// Point-in-time status of one backend, for dashboards and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub address: String,
    pub weight: u32,
    pub max_concurrency: u32,
    pub in_flight: u32,
    pub health: HealthState,
    pub consecutive_failures: u32,
    /// Unix time in milliseconds of the last successful probe
    pub last_probe_ok_ms: Option<u64>,
    pub last_probe_latency_ms: Option<u64>,
}

/// One inference backend and its live state.
///
/// Every mutable field is a single atomic; no operation needs to update two
/// fields together, so backends are shared as `Arc<Backend>` without locks.
#[derive(Debug)]
pub struct Backend {
    spec: BackendSpec,
    in_flight: AtomicU32,
    health: AtomicU8,
    consecutive_failures: AtomicU32,
    /// 0 means no successful probe yet
    last_probe_ok_ms: AtomicU64,
    /// u64::MAX means never probed
    last_probe_latency_us: AtomicU64,
}

impl Backend {
    /// New backends start healthy with no load.
    pub fn new(spec: BackendSpec) -> Self {
        Self {
            spec,
            in_flight: AtomicU32::new(0),
            health: AtomicU8::new(HealthState::Healthy as u8),
            consecutive_failures: AtomicU32::new(0),
            last_probe_ok_ms: AtomicU64::new(0),
            last_probe_latency_us: AtomicU64::new(u64::MAX),
        }
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub fn address(&self) -> &str {
        &self.spec.address
    }

    pub fn weight(&self) -> u32 {
        self.spec.weight
    }

    pub fn max_concurrency(&self) -> u32 {
        self.spec.max_concurrency
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn health(&self) -> HealthState {
        HealthState::from_u8(self.health.load(Ordering::Acquire))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn last_probe_ok_ms(&self) -> Option<u64> {
        match self.last_probe_ok_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn last_probe_latency(&self) -> Option<Duration> {
        match self.last_probe_latency_us.load(Ordering::Relaxed) {
            u64::MAX => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    /// Increments in-flight only if it stays within `max_concurrency`.
    ///
    /// The check and the increment are one atomic step, so concurrent callers
    /// can never push the counter past the ceiling.
    pub(crate) fn try_increment_in_flight(&self) -> bool {
        let max = self.spec.max_concurrency;
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    /// Decrements in-flight, refusing to go below zero.
    ///
    /// Returns `false` when the counter was already zero.
    pub(crate) fn try_decrement_in_flight(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }

    /// Counts one failed probe or dispatch and demotes accordingly.
    ///
    /// The first failure demotes to `Degraded`; reaching `threshold` consecutive
    /// failures demotes to `Unhealthy`. A backend is never promoted here.
    pub fn record_failure(&self, threshold: u32) -> Option<HealthTransition> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let target = if failures >= threshold {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        };

        let previous = HealthState::from_u8(self.health.fetch_max(target as u8, Ordering::AcqRel));
        (previous < target).then(|| HealthTransition {
            address: self.spec.address.clone(),
            from: previous,
            to: target,
        })
    }

    /// A dispatch succeeded: the failure streak is broken.
    ///
    /// Only a probe promotes a backend back to `Healthy`.
    pub fn record_dispatch_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// A probe succeeded: reset the streak and promote to `Healthy`.
    pub fn record_probe_success(&self, latency: Duration) -> Option<HealthTransition> {
        self.last_probe_ok_ms.store(unix_millis(), Ordering::Relaxed);
        self.last_probe_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        let previous =
            HealthState::from_u8(self.health.swap(HealthState::Healthy as u8, Ordering::AcqRel));
        (previous != HealthState::Healthy).then(|| HealthTransition {
            address: self.spec.address.clone(),
            from: previous,
            to: HealthState::Healthy,
        })
    }

    /// A probe failed after `latency`.
    pub fn record_probe_failure(&self, latency: Duration, threshold: u32) -> Option<HealthTransition> {
        self.last_probe_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
        self.record_failure(threshold)
    }

    pub fn view(&self) -> CandidateView<'_> {
        CandidateView {
            address: &self.spec.address,
            weight: self.spec.weight,
            max_concurrency: self.spec.max_concurrency,
            in_flight: self.in_flight(),
            health: self.health(),
        }
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            address: self.spec.address.clone(),
            weight: self.spec.weight,
            max_concurrency: self.spec.max_concurrency,
            in_flight: self.in_flight(),
            health: self.health(),
            consecutive_failures: self.consecutive_failures(),
            last_probe_ok_ms: self.last_probe_ok_ms(),
            last_probe_latency_ms: self.last_probe_latency().map(|d| d.as_millis() as u64),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
}
