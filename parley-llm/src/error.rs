//! Gateway error types.

use std::time::Duration;

use thiserror::Error;

/// Failure below the HTTP status level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not finish within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The backend could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other send or body-read failure.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Errors returned by [`crate::GenerationGateway::generate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The integration is switched off. No request was made.
    #[error("text generation is disabled")]
    Disabled,

    /// A recent failure opened the backoff window. No request was made.
    #[error("text generation backing off for another {}s", retry_in.as_secs().max(1))]
    Backoff {
        /// Time until requests are allowed again.
        retry_in: Duration,
    },

    /// The request never produced a response.
    #[error("generation backend unreachable: {0}")]
    Transport(#[from] TransportError),

    /// The backend answered with a non-success status.
    #[error("generation backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The backend answered but the payload was unusable.
    #[error("malformed generation response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Whether this failure opens the backoff window.
    #[must_use]
    pub fn arms_backoff(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. })
    }

    /// Whether the call was refused without touching the network.
    #[must_use]
    pub fn is_fast_fail(&self) -> bool {
        matches!(self, Self::Disabled | Self::Backoff { .. })
    }
}

/// Context assembly failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// A participant name required by the context is empty.
    #[error("missing participant name for {0}")]
    MissingName(&'static str),
}
