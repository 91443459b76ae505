use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a single dispatch attempt (or probe) against a backend failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No response within the attempt's timeout (milliseconds)
    Timeout(u64),
    /// TCP connect or request write failed
    Connect(String),
    /// Backend answered with a non-success HTTP status
    Status(u16),
    /// Backend answered 2xx but the body could not be read or parsed
    Malformed(String),
    /// Any other transport-level failure
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout(ms) => write!(f, "timed out after {}ms", ms),
            FailureReason::Connect(msg) => write!(f, "connection failed: {}", msg),
            FailureReason::Status(code) => write!(f, "backend returned status {}", code),
            FailureReason::Malformed(msg) => write!(f, "malformed response: {}", msg),
            FailureReason::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// One entry of the failure trail carried by [`GateError::RetryExhausted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Backend address the attempt was dispatched to
    pub backend: String,
    /// 1-based attempt number within the request
    pub attempt: u32,
    /// What went wrong
    pub reason: FailureReason,
    /// The backend's consecutive failure count right after this failure
    pub consecutive_failures: u32,
}

#[derive(Error, Debug)]
pub enum GateError {
    /// Backend at capacity. Local to selection, only surfaced through exhaustion.
    #[error("Admission denied: backend {0} is at capacity")]
    AdmissionDenied(String),

    /// Health probe failed. Local to the health monitor.
    #[error("Probe of {backend} failed: {reason}")]
    ProbeFailure {
        backend: String,
        reason: FailureReason,
    },

    /// A forward call failed. Recorded and retried on another backend.
    #[error("Dispatch to {backend} failed: {reason}")]
    DispatchFailure {
        backend: String,
        reason: FailureReason,
    },

    /// No backend passed filtering before any attempt was made.
    #[error("No backend available ({considered} registered)")]
    NoBackendAvailable { considered: usize },

    /// Every allowed attempt failed.
    #[error("No backend could serve this request after {attempts} attempt(s)")]
    RetryExhausted {
        attempts: u32,
        trail: Vec<AttemptFailure>,
    },

    /// A capacity slot was released that was never admitted.
    #[error("Release without matching admission on backend {0}")]
    ReleaseWithoutAdmit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttemptFailure {
    /// This attempt as a standalone error.
    pub fn to_error(&self) -> GateError {
        GateError::DispatchFailure {
            backend: self.backend.clone(),
            reason: self.reason.clone(),
        }
    }
}

impl GateError {
    pub fn probe_failure(backend: impl Into<String>, reason: FailureReason) -> Self {
        GateError::ProbeFailure {
            backend: backend.into(),
            reason,
        }
    }

    /// Backend address for errors local to one backend.
    pub fn backend(&self) -> Option<&str> {
        match self {
            GateError::AdmissionDenied(backend) | GateError::ReleaseWithoutAdmit(backend) => {
                Some(backend.as_str())
            }
            GateError::ProbeFailure { backend, .. } | GateError::DispatchFailure { backend, .. } => {
                Some(backend.as_str())
            }
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            GateError::ProbeFailure { reason, .. } | GateError::DispatchFailure { reason, .. } => {
                Some(reason)
            }
            _ => None,
        }
    }

    /// Whether the caller should simply try again later.
    ///
    /// `NoBackendAvailable` means every backend was busy or unhealthy; no
    /// backend actually rejected the request. `RetryExhausted` means the
    /// request failed on every backend it reached.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GateError::NoBackendAvailable { .. } | GateError::AdmissionDenied(_)
        )
    }

    /// HTTP status used by the ingress server for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::NoBackendAvailable { .. } | GateError::AdmissionDenied(_) => 503,
            GateError::RetryExhausted { .. }
            | GateError::DispatchFailure { .. }
            | GateError::ProbeFailure { .. } => 502,
            GateError::Config(_) | GateError::Yaml(_) => 400,
            GateError::ReleaseWithoutAdmit(_) | GateError::Transport(_) | GateError::Io(_) => 500,
        }
    }

    /// Stable machine-readable error type string.
    pub fn error_type(&self) -> &'static str {
        match self {
            GateError::AdmissionDenied(_) => "admission_denied",
            GateError::ProbeFailure { .. } => "probe_failure",
            GateError::DispatchFailure { .. } => "dispatch_failure",
            GateError::NoBackendAvailable { .. } => "no_backend_available",
            GateError::RetryExhausted { .. } => "retry_exhausted",
            GateError::ReleaseWithoutAdmit(_) => "internal_error",
            GateError::Config(_) | GateError::Yaml(_) => "invalid_request_error",
            GateError::Transport(_) | GateError::Io(_) => "server_error",
        }
    }

    /// Number of dispatch attempts made before this error was produced.
    pub fn attempts(&self) -> u32 {
        match self {
            GateError::RetryExhausted { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Failure trail, empty for anything but `RetryExhausted`.
    pub fn trail(&self) -> &[AttemptFailure] {
        match self {
            GateError::RetryExhausted { trail, .. } => trail,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
