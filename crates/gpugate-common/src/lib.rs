//! gpugate Common Types
//!
//! Shared vocabulary for every gpugate component:
//!
//! - **Protocol**: the opaque [`EditRequest`] the router forwards, the
//!   [`BackendReply`] a backend sends back and the [`RoutedResponse`] handed to
//!   callers together with routing metadata.
//! - **Errors**: [`GateError`], the single error enum used across the
//!   workspace, including the per-attempt failure trail.
//! - **Configuration**: [`GateConfig`], loaded from YAML and validated before
//!   any component is built from it.
//!
//! # Example
//!
//! ```
//! use gpugate_common::{EditRequest, GateConfig};
//!
//! let config = GateConfig::from_yaml_str(
//!     "backends:\n  - address: 10.0.0.1:8000\n    weight: 3\n    max_concurrency: 4\n",
//! ).unwrap();
//! assert_eq!(config.max_retries, 2);
//!
//! let request = EditRequest::new("POST", "/v1/images/edits", b"{}".to_vec());
//! assert_eq!(request.path, "/v1/images/edits");
//! ```

pub mod config;
pub mod protocol;

pub use config::{BackendSpec, GateConfig};
pub use protocol::*;
