//! Gateway configuration: the `[llm]` table of `parley.toml`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Request/response shape spoken by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Ollama `/api/generate`.
    #[serde(rename = "ollama")]
    Ollama,
    /// OpenAI-style `/chat/completions`.
    #[serde(rename = "openai", alias = "openai_compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    /// Guess the provider from a base URL.
    ///
    /// Only used when `provider` is not set explicitly.
    #[must_use]
    pub fn sniff(base_url: &str) -> Self {
        if base_url.to_lowercase().contains("openai.com") {
            Self::OpenAiCompatible
        } else {
            Self::Ollama
        }
    }
}

/// Generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Master switch. When off every call fails with `Disabled`.
    #[serde(default)]
    pub enabled: bool,
    /// Backend shape. Sniffed from `base_url` when absent.
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Backend root URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token for hosted APIs.
    #[serde(default)]
    pub api_key: String,
    /// Sampling temperature, 0.0–1.0.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token cap for chat backends.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound on context lines any session may keep.
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long calls are refused after a transport or status failure.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            model: default_model(),
            base_url: default_base_url(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_context_length: default_max_context_length(),
            timeout_secs: default_timeout_secs(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl GatewayConfig {
    /// Clamp values into their usable ranges and fill empty strings.
    ///
    /// A negative temperature is treated as unset.
    pub fn validate(&mut self) {
        if self.temperature.is_nan() || self.temperature < 0.0 {
            self.temperature = default_temperature();
        } else if self.temperature > 1.0 {
            self.temperature = 1.0;
        }
        self.max_context_length = self.max_context_length.clamp(1, 50);
        if self.model.trim().is_empty() {
            self.model = default_model();
        }
        if self.base_url.trim().is_empty() {
            self.base_url = default_base_url();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
    }

    /// The provider to use, sniffing the URL if none is configured.
    #[must_use]
    pub fn resolved_provider(&self) -> ProviderKind {
        if let Some(kind) = self.provider {
            return kind;
        }
        let kind = ProviderKind::sniff(&self.base_url);
        warn!(
            base_url = %self.base_url,
            provider = ?kind,
            "llm.provider not set; guessed from base_url"
        );
        kind
    }

    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff window.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

fn default_model() -> String { "llama3.3".to_string() }
fn default_base_url() -> String { "http://localhost:11434".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 500 }
fn default_max_context_length() -> usize { 10 }
fn default_timeout_secs() -> u64 { 30 }
fn default_backoff_secs() -> u64 { 30 }
