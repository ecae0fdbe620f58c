//! Per-player token usage and cost.
//!
//! Counts come from the backend when it reports them, otherwise from a
//! four-characters-per-token estimate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Accumulated usage for one player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Successful generations billed to the player.
    pub total_calls: u64,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Dollars.
    pub total_cost: f64,
    /// Last successful generation.
    pub last_used: Option<DateTime<Utc>>,
}

/// Dollar cost per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Prompt tokens.
    pub input_per_1k: f64,
    /// Completion tokens.
    pub output_per_1k: f64,
}

impl ModelPricing {
    /// Free, e.g. a local model.
    pub const FREE: Self = Self {
        input_per_1k: 0.0,
        output_per_1k: 0.0,
    };

    /// Pricing for a model name. Unknown models are free.
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        match model {
            "gpt-4.1-nano" => Self {
                input_per_1k: 0.0003,
                output_per_1k: 0.0015,
            },
            _ => Self::FREE,
        }
    }

    /// Cost of one call.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Rough token count for text the backend did not count for us.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// Internally synchronized usage map, keyed by player account id.
#[derive(Debug, Default)]
pub struct UsageLedger {
    entries: RwLock<HashMap<u64, TokenUsage>>,
}

impl UsageLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one successful call.
    pub fn record(&self, user_id: u64, model: &str, input_tokens: u64, output_tokens: u64, now: DateTime<Utc>) {
        let cost = ModelPricing::for_model(model).cost(input_tokens, output_tokens);
        let mut entries = self.entries.write();
        let usage = entries.entry(user_id).or_default();
        usage.total_calls += 1;
        usage.input_tokens += input_tokens;
        usage.output_tokens += output_tokens;
        usage.total_cost += cost;
        usage.last_used = Some(now);
    }

    /// Usage for one player.
    #[must_use]
    pub fn get(&self, user_id: u64) -> Option<TokenUsage> {
        self.entries.read().get(&user_id).cloned()
    }

    /// Seed a player's usage, e.g. from their saved character data.
    /// Does nothing if the player already has live usage.
    pub fn restore(&self, user_id: u64, usage: TokenUsage) {
        self.entries.write().entry(user_id).or_insert(usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_four_chars_per_token() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abc"), 0);
    }

    #[test]
    fn prices_known_models() {
        let nano = ModelPricing::for_model("gpt-4.1-nano");
        let cost = nano.cost(2000, 1000);
        assert!((cost - (0.0006 + 0.0015)).abs() < 1e-12);
        assert!(ModelPricing::for_model("llama3.3").cost(10_000, 10_000).abs() < f64::EPSILON);
    }

    #[test]
    fn ledger_accumulates_per_user() {
        let ledger = UsageLedger::new();
        let now = Utc::now();
        ledger.record(4, "gpt-4.1-nano", 100, 50, now);
        ledger.record(4, "gpt-4.1-nano", 100, 50, now);
        ledger.record(5, "llama3.3", 10, 10, now);

        let u = ledger.get(4).expect("recorded");
        assert_eq!(u.total_calls, 2);
        assert_eq!(u.input_tokens, 200);
        assert_eq!(u.output_tokens, 100);
        assert!(u.total_cost > 0.0);
        assert_eq!(u.last_used, Some(now));
        assert_eq!(ledger.get(5).map(|u| u.total_calls), Some(1));
    }

    #[test]
    fn restore_does_not_clobber_live_usage() {
        let ledger = UsageLedger::new();
        ledger.record(1, "m", 1, 1, Utc::now());
        ledger.restore(1, TokenUsage::default());
        assert_eq!(ledger.get(1).map(|u| u.total_calls), Some(1));
        ledger.restore(2, TokenUsage { total_calls: 9, ..TokenUsage::default() });
        assert_eq!(ledger.get(2).map(|u| u.total_calls), Some(9));
    }
}
