//! # gpugate
//!
//! Capacity-aware reverse proxy for GPU-bound inference backends.
//!
//! This crate re-exports the workspace members:
//!
//! - [`common`]: request/response types, errors, configuration
//! - [`metrics`]: request, dispatch and probe metrics
//! - [`router`]: registry, health monitor, capacity tracker, selection,
//!   request router and HTTP ingress
//!
//! ```no_run
//! use gpugate::{GateConfig, HttpServer, RequestRouter};
//! use std::sync::Arc;
//!
//! # async fn run() -> gpugate::Result<()> {
//! let config = GateConfig::from_file("gpugate.yaml")?;
//! let router = RequestRouter::from_config(&config).await?;
//! HttpServer::new(Arc::new(router))
//!     .with_config_path("gpugate.yaml")
//!     .run("0.0.0.0:8080".parse().unwrap())
//!     .await
//! # }
//! ```

pub use gpugate_common as common;
pub use gpugate_metrics as metrics;
pub use gpugate_router as router;

pub use gpugate_common::{
    AttemptFailure, BackendReply, BackendSpec, EditRequest, FailureReason, GateConfig, GateError,
    Result, RoutedResponse,
};
pub use gpugate_metrics::{MetricsRegistry, MetricsSnapshot};
pub use gpugate_router::{
    Backend, BackendRegistry, FleetStatus, HealthMonitor, HealthState, HttpServer, RequestRouter,
};
