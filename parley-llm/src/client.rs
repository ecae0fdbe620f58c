//! Generation gateway: one entry point for every backend call.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::config::{GatewayConfig, ProviderKind};
use crate::error::GatewayError;
use crate::transport::{HttpRequest, HttpTransport, RawResponse, Transport};
use crate::types::{ChatResponse, Generation, OllamaResponse};
use crate::usage::{estimate_tokens, UsageLedger};

/// Longest error body kept in [`GatewayError::Status`].
const MAX_ERROR_BODY: usize = 200;

/// Routes generation requests to the configured backend behind a shared
/// backoff window.
pub struct GenerationGateway {
    config: GatewayConfig,
    provider: ProviderKind,
    endpoint: String,
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    usage: Arc<UsageLedger>,
}

impl std::fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("enabled", &self.config.enabled)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl GenerationGateway {
    /// Gateway over an arbitrary transport. The config is validated first.
    #[must_use]
    pub fn new(mut config: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        config.validate();
        let provider = config.resolved_provider();
        let endpoint = endpoint_for(provider, &config.base_url);
        let backoff = Backoff::new(config.backoff());
        Self {
            config,
            provider,
            endpoint,
            transport,
            backoff,
            usage: Arc::new(UsageLedger::new()),
        }
    }

    /// Gateway over HTTP.
    #[must_use]
    pub fn from_config(config: GatewayConfig) -> Self {
        Self::new(config, Arc::new(HttpTransport::new()))
    }

    /// Gateway that refuses every call.
    #[must_use]
    pub fn disabled() -> Self {
        Self::from_config(GatewayConfig {
            enabled: false,
            provider: Some(ProviderKind::Ollama),
            ..GatewayConfig::default()
        })
    }

    /// Share an existing usage ledger.
    #[must_use]
    pub fn with_usage_ledger(mut self, usage: Arc<UsageLedger>) -> Self {
        self.usage = usage;
        self
    }

    /// Whether the integration is switched on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Validated configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Backend shape in use.
    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Resolved endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Per-player usage.
    #[must_use]
    pub fn usage(&self) -> &Arc<UsageLedger> {
        &self.usage
    }

    /// Shared backoff window.
    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Generate text for `prompt` given prior `context` lines.
    ///
    /// Usage is billed to `billing_user` on success.
    ///
    /// # Errors
    /// - [`GatewayError::Disabled`] / [`GatewayError::Backoff`] without any
    ///   network traffic.
    /// - [`GatewayError::Transport`] / [`GatewayError::Status`], which also
    ///   open the backoff window.
    /// - [`GatewayError::Malformed`] when the backend answered with something
    ///   unusable. The window stays closed.
    pub async fn generate(
        &self,
        prompt: &str,
        context: &[String],
        billing_user: Option<u64>,
    ) -> Result<Generation, GatewayError> {
        if !self.config.enabled {
            debug!("generation skipped: integration disabled");
            return Err(GatewayError::Disabled);
        }
        if let Some(retry_in) = self.backoff.remaining() {
            debug!(retry_in_ms = retry_in.as_millis() as u64, "generation skipped: backing off");
            return Err(GatewayError::Backoff { retry_in });
        }

        let request = self.build_request(prompt, context);
        let started = Instant::now();
        let raw = match self.transport.post_json(request).await {
            Ok(raw) => raw,
            Err(err) => {
                self.backoff.arm();
                warn!(endpoint = %self.endpoint, error = %err, "generation request failed; backing off");
                return Err(err.into());
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        if !raw.is_success() {
            self.backoff.arm();
            warn!(endpoint = %self.endpoint, status = raw.status, "generation backend error; backing off");
            return Err(GatewayError::Status {
                status: raw.status,
                body: truncate(&raw.body, MAX_ERROR_BODY),
            });
        }

        let (text, reported) = match self.provider {
            ProviderKind::Ollama => decode_ollama(&raw)?,
            ProviderKind::OpenAiCompatible => decode_chat(&raw)?,
        };

        let prompt_chars: String = context.iter().map(String::as_str).chain([prompt]).collect();
        let (input_tokens, output_tokens, estimated) = match reported {
            Some((input, output)) => (input, output, false),
            None => (estimate_tokens(&prompt_chars), estimate_tokens(&text), true),
        };

        if let Some(user) = billing_user {
            self.usage
                .record(user, &self.config.model, input_tokens, output_tokens, Utc::now());
        }
        debug!(latency_ms, input_tokens, output_tokens, estimated, "generation complete");

        Ok(Generation {
            text,
            input_tokens,
            output_tokens,
            estimated,
            provider: self.provider,
            model: self.config.model.clone(),
            latency_ms,
        })
    }

    fn build_request(&self, prompt: &str, context: &[String]) -> HttpRequest {
        let body = match self.provider {
            ProviderKind::Ollama => json!({
                "model": self.config.model,
                "prompt": ollama_prompt(context, prompt),
                "temperature": self.config.temperature,
                "stream": false,
            }),
            ProviderKind::OpenAiCompatible => {
                let mut messages = Vec::with_capacity(2);
                if !context.is_empty() {
                    messages.push(json!({ "role": "system", "content": context.join("\n") }));
                }
                messages.push(json!({ "role": "user", "content": prompt }));
                json!({
                    "model": self.config.model,
                    "messages": messages,
                    "temperature": self.config.temperature,
                    "max_tokens": self.config.max_tokens,
                })
            }
        };
        let bearer = Some(self.config.api_key.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        HttpRequest {
            url: self.endpoint.clone(),
            bearer,
            body,
            timeout: self.config.timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn endpoint_for(provider: ProviderKind, base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let suffix = match provider {
        ProviderKind::Ollama => "/api/generate",
        ProviderKind::OpenAiCompatible => "/chat/completions",
    };
    if base.ends_with(suffix) {
        base.to_string()
    } else {
        format!("{base}{suffix}")
    }
}

fn ollama_prompt(context: &[String], prompt: &str) -> String {
    if context.is_empty() {
        prompt.to_string()
    } else {
        format!("{}\n\n{prompt}", context.join("\n"))
    }
}

type Decoded = (String, Option<(u64, u64)>);

fn decode_ollama(raw: &RawResponse) -> Result<Decoded, GatewayError> {
    let resp: OllamaResponse =
        serde_json::from_str(&raw.body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    if let Some(err) = resp.error.filter(|e| !e.is_empty()) {
        return Err(GatewayError::Malformed(format!("backend error: {err}")));
    }
    if !resp.done {
        return Err(GatewayError::Malformed("response incomplete (done=false)".into()));
    }
    let text = non_empty(&resp.response)?;
    let counts = resp.prompt_eval_count.zip(resp.eval_count);
    Ok((text, counts))
}

fn decode_chat(raw: &RawResponse) -> Result<Decoded, GatewayError> {
    let resp: ChatResponse =
        serde_json::from_str(&raw.body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    if let Some(err) = resp.error {
        return Err(GatewayError::Malformed(format!("backend error: {}", err.message)));
    }
    let choice = resp
        .choices
        .first()
        .ok_or_else(|| GatewayError::Malformed("no choices in response".into()))?;
    let text = non_empty(&choice.message.content)?;
    let counts = resp.usage.map(|u| (u.prompt_tokens, u.completion_tokens));
    Ok((text, counts))
}

fn non_empty(text: &str) -> Result<String, GatewayError> {
    let text = text.trim();
    if text.is_empty() {
        Err(GatewayError::Malformed("empty response".into()))
    } else {
        Ok(text.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
