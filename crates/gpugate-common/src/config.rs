//! Router configuration
//!
//! A single YAML document describes the backend fleet and the timing knobs of
//! the health monitor and request router. Every field except `backends` has a
//! default, so the smallest valid file is just a backend list.
//!
//! ```yaml
//! bind: 0.0.0.0:8080
//! probe_interval_seconds: 10
//! probe_timeout_seconds: 3
//! failure_threshold_unhealthy: 3
//! dispatch_timeout_seconds: 30
//! max_retries: 2
//! backends:
//!   - address: 10.0.0.1:8000
//!     weight: 4
//!     max_concurrency: 8
//!   - address: 10.0.0.2:8000
//!     weight: 1
//!     max_concurrency: 2
//! ```

use crate::protocol::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Declared properties of one backend in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Stable identity, `host:port`
    pub address: String,
    /// Relative capacity share, must be positive
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Upper bound on simultaneous in-flight requests
    pub max_concurrency: u32,
}

impl BackendSpec {
    pub fn new(address: impl Into<String>, weight: u32, max_concurrency: u32) -> Self {
        Self {
            address: address.into(),
            weight,
            max_concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Address the ingress server listens on
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,

    /// Consecutive failures after which a backend is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold_unhealthy: u32,

    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_seconds: u64,

    /// Retries after the first attempt (2 means 3 attempts in total)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Path probed on every backend
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Largest request body the ingress server accepts
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    #[serde(default)]
    pub backends: Vec<BackendSpec>,
}

fn default_weight() -> u32 {
    1
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_probe_interval() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_dispatch_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_max_request_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            probe_interval_seconds: default_probe_interval(),
            probe_timeout_seconds: default_probe_timeout(),
            failure_threshold_unhealthy: default_failure_threshold(),
            dispatch_timeout_seconds: default_dispatch_timeout(),
            max_retries: default_max_retries(),
            health_path: default_health_path(),
            max_request_bytes: default_max_request_bytes(),
            backends: Vec::new(),
        }
    }
}

impl GateConfig {
    /// Load and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: GateConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_backends(mut self, backends: Vec<BackendSpec>) -> Self {
        self.backends = backends;
        self
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_seconds)
    }

    /// Check timing knobs and the backend list.
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_seconds == 0 {
            return Err(GateError::Config(
                "probe_interval_seconds must be greater than 0".into(),
            ));
        }
        if self.probe_timeout_seconds == 0 {
            return Err(GateError::Config(
                "probe_timeout_seconds must be greater than 0".into(),
            ));
        }
        if self.probe_timeout_seconds >= self.probe_interval_seconds {
            return Err(GateError::Config(format!(
                "probe_timeout_seconds ({}) must be shorter than probe_interval_seconds ({})",
                self.probe_timeout_seconds, self.probe_interval_seconds
            )));
        }
        if self.failure_threshold_unhealthy == 0 {
            return Err(GateError::Config(
                "failure_threshold_unhealthy must be at least 1".into(),
            ));
        }
        if self.dispatch_timeout_seconds == 0 {
            return Err(GateError::Config(
                "dispatch_timeout_seconds must be greater than 0".into(),
            ));
        }
        if !self.health_path.starts_with('/') {
            return Err(GateError::Config(format!(
                "health_path must start with '/', got {:?}",
                self.health_path
            )));
        }
        validate_backends(&self.backends)
    }
}

/// Validate a backend set on its own; used both at load time and on reload.
pub fn validate_backends(backends: &[BackendSpec]) -> Result<()> {
    if backends.is_empty() {
        return Err(GateError::Config("at least one backend is required".into()));
    }

    let mut seen = HashSet::new();
    for spec in backends {
        if spec.address.trim().is_empty() {
            return Err(GateError::Config("backend address must not be empty".into()));
        }
        if !seen.insert(spec.address.as_str()) {
            return Err(GateError::Config(format!(
                "duplicate backend address {}",
                spec.address
            )));
        }
        if spec.weight == 0 {
            return Err(GateError::Config(format!(
                "backend {} has weight 0",
                spec.address
            )));
        }
        if spec.max_concurrency == 0 {
            return Err(GateError::Config(format!(
                "backend {} has max_concurrency 0",
                spec.address
            )));
        }
    }
    Ok(())
}
