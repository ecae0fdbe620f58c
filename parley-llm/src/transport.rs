//! HTTP transport port.
//!
//! The gateway only needs "POST this JSON, give me status and body", so
//! that is all the port exposes. [`HttpTransport`] is the reqwest
//! implementation; tests substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::TransportError;

/// One outgoing JSON request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Full endpoint URL.
    pub url: String,
    /// Bearer token, if the backend needs one.
    pub bearer: Option<String>,
    /// JSON body.
    pub body: serde_json::Value,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends JSON requests to a generation backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `request.body` to `request.url`.
    async fn post_json(&self, request: HttpRequest) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Transport with a fresh connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self { http: Client::new() }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .http
            .post(&request.url)
            .json(&request.body)
            .timeout(request.timeout);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse { status, body })
    }
}
