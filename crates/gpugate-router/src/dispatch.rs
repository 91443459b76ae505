//! Forwarding requests to backends.
//!
//! The router only needs to know whether an attempt succeeded; the
//! [`Dispatcher`] trait keeps the network out of the routing logic so tests
//! can script backend behaviour.

use async_trait::async_trait;
use bytes::Bytes;
use gpugate_common::{BackendReply, EditRequest, FailureReason};
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Builds the pooled HTTP/1 client shared by dispatch and probing.
pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Hop-by-hop and framing headers that must not be copied between legs.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Whether a header may be forwarded from the caller to a backend (or back).
pub fn is_forwardable_header(name: &str) -> bool {
    !HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Sends `request` to the backend at `address`.
    ///
    /// `timeout` is the budget for this attempt; the router also enforces it
    /// from the outside.
    async fn dispatch(
        &self,
        address: &str,
        request: &EditRequest,
        timeout: Duration,
    ) -> Result<BackendReply, FailureReason>;
}

/// Production dispatcher: plain HTTP/1 via hyper-util.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: HttpClient,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn build_request(
        address: &str,
        request: &EditRequest,
    ) -> Result<Request<Full<Bytes>>, FailureReason> {
        let path = if request.path.starts_with('/') {
            request.path.clone()
        } else {
            format!("/{}", request.path)
        };

        let mut builder = Request::builder()
            .method(request.method.as_str())
            .uri(format!("http://{}{}", address, path));

        for (name, value) in &request.headers {
            if is_forwardable_header(name) && !name.eq_ignore_ascii_case("x-request-id") {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder = builder.header(
            "x-request-id",
            request
                .header("x-request-id")
                .map(str::to_string)
                .unwrap_or_else(|| request.id.to_string()),
        );

        builder
            .body(Full::new(request.payload.clone()))
            .map_err(|e| FailureReason::Transport(format!("Failed to build request: {}", e)))
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        address: &str,
        request: &EditRequest,
        timeout: Duration,
    ) -> Result<BackendReply, FailureReason> {
        let http_request = Self::build_request(address, request)?;

        let exchange = async {
            let response = self.client.request(http_request).await.map_err(|e| {
                if e.is_connect() {
                    FailureReason::Connect(e.to_string())
                } else {
                    FailureReason::Transport(e.to_string())
                }
            })?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| FailureReason::Malformed(format!("Failed to read body: {}", e)))?
                .to_bytes();
            Ok::<_, FailureReason>((parts, body))
        };

        let (parts, body) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| FailureReason::Timeout(timeout.as_millis() as u64))??;

        if !parts.status.is_success() {
            return Err(FailureReason::Status(parts.status.as_u16()));
        }

        let headers: Vec<(String, String)> = parts
            .headers
            .iter()
            .filter(|(name, _)| is_forwardable_header(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let reply = BackendReply {
            status: parts.status.as_u16(),
            headers,
            body,
        };
        validate_reply(&reply)?;
        Ok(reply)
    }
}

/// A 2xx reply that claims to be JSON must parse as JSON.
pub fn validate_reply(reply: &BackendReply) -> Result<(), FailureReason> {
    let is_json = reply
        .content_type()
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_slice::<serde::de::IgnoredAny>(&reply.body)
            .map_err(|e| FailureReason::Malformed(format!("invalid JSON body: {}", e)))?;
    }
    Ok(())
}
