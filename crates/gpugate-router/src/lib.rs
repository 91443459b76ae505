//! # gpugate-router
//!
//! Routes opaque inference requests across a fleet of GPU backends that each
//! serve a bounded number of requests at a time. A request goes to the least
//! loaded healthy backend (weighted round-robin among equals), fails over to
//! another backend when an attempt fails, and never pushes a backend past its
//! concurrency ceiling.
//!
//! The pieces, bottom-up:
//!
//! - [`BackendRegistry`]: the current backend set, swapped atomically on reload
//! - [`HealthMonitor`]: periodic probes driving `Healthy`/`Degraded`/`Unhealthy`
//! - [`CapacityTracker`]: per-backend in-flight slots
//! - [`SelectionPolicy`]: picks the next backend
//! - [`RequestRouter`]: selection, admission, dispatch and failover per request
//! - [`HttpServer`]: the axum ingress in front of the router

pub mod backend;
pub mod capacity;
pub mod dispatch;
pub mod health_checker;
pub mod http_server;
pub mod registry;
pub mod router;
pub mod selection;

pub use backend::{Backend, BackendStatus, CandidateView, HealthState, HealthTransition};
pub use capacity::{AdmissionSlot, CapacityStats, CapacityTracker};
pub use dispatch::{Dispatcher, HttpDispatcher};
pub use health_checker::{HealthCheckConfig, HealthMonitor, HttpProbe, Probe, ProbeReport};
pub use http_server::HttpServer;
pub use registry::BackendRegistry;
pub use router::{FleetStatus, RequestLifecycle, RequestRouter, RequestState, RetryConfig};
pub use selection::{choose_candidate, SelectionPolicy, TierCursors};
