//! gpugate Response Types

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// What a backend sent back for a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl BackendReply {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
    }
}

/// Routing metadata attached to every successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMetadata {
    /// Address of the backend that served the request
    pub backend: String,
    /// Wall time from the request entering the router to the reply, in ms
    pub latency_ms: u64,
    /// Dispatch attempts made, including the successful one
    pub attempts: u32,
}

/// Normalized result handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedResponse {
    pub reply: BackendReply,
    pub meta: RouteMetadata,
}
