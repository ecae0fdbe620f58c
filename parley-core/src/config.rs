//! Configuration sections owned by the core crate.
//!
//! These map to the `[general]`, `[dialogue]` and `[memory]` tables of
//! `parley.toml`. The engine composes them with the gateway section into
//! one file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether conversations may be started at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dialogue
// ---------------------------------------------------------------------------

/// Session lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueSettings {
    /// Root folder holding `<zone>/<mob id>.yaml` dialogue definitions.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Minimum gap between two generations for one session.
    #[serde(default = "default_generation_cooldown_ms")]
    pub generation_cooldown_ms: u64,
    /// Probability that a lookup also runs the maintenance sweep.
    #[serde(default = "default_maintenance_chance")]
    pub maintenance_chance: f64,
    /// Rounds without progress before a session counts as abandoned.
    #[serde(default = "default_stale_round_threshold")]
    pub stale_round_threshold: u64,
    /// Number of destroy workers.
    #[serde(default = "default_destroy_workers")]
    pub destroy_workers: usize,
    /// Capacity of the destroy queue.
    #[serde(default = "default_destroy_queue_capacity")]
    pub destroy_queue_capacity: usize,
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            generation_cooldown_ms: default_generation_cooldown_ms(),
            maintenance_chance: default_maintenance_chance(),
            stale_round_threshold: default_stale_round_threshold(),
            destroy_workers: default_destroy_workers(),
            destroy_queue_capacity: default_destroy_queue_capacity(),
        }
    }
}

impl DialogueSettings {
    /// Clamp out-of-range values into something usable.
    pub fn validate(&mut self) {
        if !(0.0..=1.0).contains(&self.maintenance_chance) || self.maintenance_chance.is_nan() {
            self.maintenance_chance = default_maintenance_chance();
        }
        self.destroy_workers = self.destroy_workers.max(1);
        self.destroy_queue_capacity = self.destroy_queue_capacity.max(1);
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Cross-session memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Hours before a recollection is forgotten.
    #[serde(default = "default_expiration_hours")]
    pub expiration_hours: u64,
    /// Maximum remembered topics per pair.
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,
    /// Turn-pairs of raw context carried into the next session.
    #[serde(default = "default_max_context_pairs")]
    pub max_context_pairs: usize,
    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            expiration_hours: default_expiration_hours(),
            max_topics: default_max_topics(),
            max_context_pairs: default_max_context_pairs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl MemorySettings {
    /// Expiration window as a chrono duration.
    #[must_use]
    pub fn expiration(&self) -> chrono::Duration {
        const MAX_HOURS: i64 = i64::MAX / 1_000 / 3_600;
        let hours = i64::try_from(self.expiration_hours).unwrap_or(MAX_HOURS).min(MAX_HOURS);
        chrono::Duration::hours(hours)
    }

    /// Period of the expiry sweep. Never zero.
    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

// ---------------------------------------------------------------------------
// Default value functions (required by serde)
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from("_datafiles/conversations") }
fn default_generation_cooldown_ms() -> u64 { 2_000 }
fn default_maintenance_chance() -> f64 { 0.02 }
fn default_stale_round_threshold() -> u64 { 10 }
fn default_destroy_workers() -> usize { 2 }
fn default_destroy_queue_capacity() -> usize { 256 }
fn default_expiration_hours() -> u64 { 24 }
fn default_max_topics() -> usize { 5 }
fn default_max_context_pairs() -> usize { 3 }
fn default_sweep_interval_secs() -> u64 { 3_600 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let d = DialogueSettings::default();
        assert_eq!(d.generation_cooldown_ms, 2_000);
        assert!((d.maintenance_chance - 0.02).abs() < f64::EPSILON);
        assert_eq!(d.stale_round_threshold, 10);

        let m = MemorySettings::default();
        assert_eq!(m.expiration(), chrono::Duration::hours(24));
        assert_eq!(m.max_topics, 5);
        assert_eq!(m.max_context_pairs, 3);
    }

    #[test]
    fn validate_clamps_bad_values() {
        let mut d = DialogueSettings {
            maintenance_chance: 4.0,
            destroy_workers: 0,
            destroy_queue_capacity: 0,
            ..DialogueSettings::default()
        };
        d.validate();
        assert!((d.maintenance_chance - 0.02).abs() < f64::EPSILON);
        assert_eq!(d.destroy_workers, 1);
        assert_eq!(d.destroy_queue_capacity, 1);
    }
}
