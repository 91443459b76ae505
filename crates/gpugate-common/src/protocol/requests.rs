//! gpugate Request Types
//!
//! An [`EditRequest`] is the unit of work the router forwards. The router never
//! looks inside `payload`; it only carries the method, path and a filtered set
//! of headers through to whichever backend is selected.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub id: RequestId,
    /// HTTP method to use against the backend
    pub method: String,
    /// Path and query, forwarded verbatim (e.g. `/v1/images/edits`)
    pub path: String,
    /// Headers forwarded to the backend (content-type, accept, ...)
    pub headers: Vec<(String, String)>,
    /// Opaque request body
    pub payload: Bytes,
    /// Caller's overall response budget; `None` means only the per-attempt
    /// dispatch timeout applies
    pub timeout: Option<Duration>,
}

impl EditRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        EditRequest {
            id: generate_request_id(),
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            payload: payload.into(),
            timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // upper 32 bits from the clock, lower 32 from the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
