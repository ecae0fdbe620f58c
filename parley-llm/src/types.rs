//! Wire types for the supported backends, and the gateway's result type.

use serde::Deserialize;

use crate::config::ProviderKind;

/// Successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Generated text, trimmed.
    pub text: String,
    /// Prompt tokens, reported or estimated.
    pub input_tokens: u64,
    /// Completion tokens, reported or estimated.
    pub output_tokens: u64,
    /// Whether the token counts are character-based estimates.
    pub estimated: bool,
    /// Backend that produced the text.
    pub provider: ProviderKind,
    /// Model that produced the text.
    pub model: String,
    /// Wall time of the request.
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// `/api/generate` reply with `stream: false`.
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// `/chat/completions` reply.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
    #[serde(default)]
    pub error: Option<ChatErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatErrorBody {
    #[serde(default)]
    pub message: String,
}
