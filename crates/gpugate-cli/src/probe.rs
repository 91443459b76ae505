//! One-shot health check over a config's backends.

use gpugate_common::GateConfig;
use gpugate_router::{BackendRegistry, HealthCheckConfig, HealthMonitor, HttpProbe, ProbeReport};
use serde::Serialize;
use std::sync::Arc;

/// Result of `gpugate probe`.
#[derive(Debug, Serialize)]
pub struct ProbeSummary {
    pub healthy: usize,
    pub failed: usize,
    pub backends: Vec<ProbeReport>,
}

impl ProbeSummary {
    pub fn all_ok(&self) -> bool {
        self.failed == 0
    }
}

/// Probes every configured backend once, concurrently.
///
/// Reports come back in config order regardless of completion order.
pub async fn probe_once(config: &GateConfig) -> ProbeSummary {
    let registry = Arc::new(BackendRegistry::new(config.backends.clone()));
    let monitor = HealthMonitor::new(
        registry,
        Arc::new(HttpProbe::new(config.health_path.clone())),
        HealthCheckConfig::from(config),
    );

    let mut reports = monitor.check_all().await;
    reports.sort_by_key(|r| {
        config
            .backends
            .iter()
            .position(|b| b.address == r.address)
            .unwrap_or(usize::MAX)
    });

    let failed = reports.iter().filter(|r| !r.ok).count();
    ProbeSummary {
        healthy: reports.len() - failed,
        failed,
        backends: reports,
    }
}
