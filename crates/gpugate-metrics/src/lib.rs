//! gpugate Metrics Collection
//!
//! Thread-safe counters and latency histograms for the router. Three event
//! streams are tracked:
//!
//! - **Requests**: every call into the router, broken down by terminal outcome
//!   (succeeded, exhausted, unavailable) with end-to-end latency.
//! - **Dispatches**: every attempt against a backend, with per-backend
//!   success/failure counts and latency percentiles.
//! - **Probes**: every health probe result per backend.
//!
//! # Usage Example
//!
//! ```rust
//! use gpugate_metrics::MetricsRegistry;
//! use std::time::Duration;
//!
//! let metrics = MetricsRegistry::new();
//! metrics.record_request_received();
//! metrics.record_dispatch("10.0.0.1:8000", Duration::from_millis(120), true);
//! metrics.record_request_succeeded(Duration::from_millis(125));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.total_requests, 1);
//! assert_eq!(snapshot.backends["10.0.0.1:8000"].dispatch_count, 1);
//! ```
//!
//! # Thread Safety
//!
//! Counter increments are lock-free atomics. The per-backend map sits behind a
//! `parking_lot::RwLock` that is only write-locked the first time a backend
//! address is seen.

mod registry;
mod snapshot;

pub use registry::MetricsRegistry;
pub use snapshot::{BackendMetrics, LatencySummary, MetricsSnapshot, ServerInfo};
