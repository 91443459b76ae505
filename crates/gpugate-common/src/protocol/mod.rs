pub mod error;
pub mod requests;
pub mod responses;


pub use error::{AttemptFailure, FailureReason, GateError, Result};
pub use requests::{EditRequest, RequestId};
pub use responses::{BackendReply, RouteMetadata, RoutedResponse};
