//! # parley-llm: Generation Gateway for Parley
//!
//! Turns a prompt plus conversation context into generated NPC speech via
//! one configured backend:
//!   - **Ollama** (`/api/generate`, single concatenated prompt)
//!   - **OpenAI-compatible API** (`/chat/completions`, role-tagged messages)
//!
//! Every call goes through [`GenerationGateway::generate`], which
//!   - fails fast when the integration is disabled,
//!   - fails fast while the shared backoff window is open,
//!   - arms that window on transport errors and non-success statuses,
//!   - records per-player token usage on success.
//!
//! The gateway never retries. A failed call costs the caller one turn,
//! not one tick.

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod prompt;
pub mod transport;
pub mod types;
pub mod usage;

pub use backoff::Backoff;
pub use client::GenerationGateway;
pub use config::{GatewayConfig, ProviderKind};
pub use error::{GatewayError, PromptError, TransportError};
pub use transport::{HttpRequest, HttpTransport, RawResponse, Transport};
pub use types::Generation;
pub use usage::{TokenUsage, UsageLedger};
