//! Engine configuration: maps directly to `parley.toml`.
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [dialogue]
//! data_dir = "_datafiles/conversations"
//!
//! [memory]
//! expiration_hours = 12
//!
//! [llm]
//! enabled = true
//! provider = "ollama"
//! ```

use std::path::Path;

use parley_core::config::{DialogueSettings, GeneralConfig, MemorySettings};
use parley_core::ConverseError;
use parley_llm::GatewayConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Session lifecycle.
    #[serde(default)]
    pub dialogue: DialogueSettings,
    /// Cross-session memory.
    #[serde(default)]
    pub memory: MemorySettings,
    /// Generation backend.
    #[serde(default)]
    pub llm: GatewayConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML string. Values are validated.
    ///
    /// # Errors
    /// Returns `ConverseError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> parley_core::Result<Self> {
        let mut config: Self =
            toml::from_str(toml_str).map_err(|e| ConverseError::Config(e.to_string()))?;
        config.validate();
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> parley_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Clamp every section into its usable range.
    pub fn validate(&mut self) {
        self.dialogue.validate();
        self.llm.validate();
    }

    /// Generation cooldown as a chrono duration.
    #[must_use]
    pub fn generation_cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(
            i64::try_from(self.dialogue.generation_cooldown_ms).unwrap_or(i64::MAX / 1_000_000),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = EngineConfig::from_toml("").expect("empty is valid");
        assert!(cfg.general.enabled);
        assert!(!cfg.llm.enabled);
        assert_eq!(cfg.dialogue.stale_round_threshold, 10);
        assert_eq!(cfg.generation_cooldown(), chrono::Duration::seconds(2));
    }

    #[test]
    fn sections_are_validated_on_load() {
        let cfg = EngineConfig::from_toml(
            r#"
            [dialogue]
            maintenance_chance = 7.5
            destroy_workers = 0

            [llm]
            enabled = true
            temperature = 9.0
            max_context_length = 99
            "#,
        )
        .expect("valid toml");
        assert!((cfg.dialogue.maintenance_chance - 0.02).abs() < f64::EPSILON);
        assert_eq!(cfg.dialogue.destroy_workers, 1);
        assert!((cfg.llm.temperature - 1.0).abs() < f32::EPSILON);
        assert_eq!(cfg.llm.max_context_length, 50);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = EngineConfig::from_toml("[dialogue\n").expect_err("broken");
        assert!(matches!(err, ConverseError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[memory]\nexpiration_hours = 2\n").expect("write");
        let cfg = EngineConfig::from_file(&path).expect("readable");
        assert_eq!(cfg.memory.expiration(), chrono::Duration::hours(2));
    }
}
