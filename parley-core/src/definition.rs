//! Dialogue definition files.
//!
//! One YAML file per `(zone, initiator mob)` lives at
//! `<data_dir>/<sanitized zone>/<mob id>.yaml` and holds a list of
//! variants:
//!
//! ```yaml
//! - Supported:
//!     merchant: ["guard", "*"]
//!   Conversation:
//!     - ["#1 emote waves", "#2 say Evening."]
//!     - ["#1 llm Ask the guard about the night watch."]
//!   LLMConfig:
//!     SystemPrompt: "You are a merchant in a busy square."
//!     Greeting: "Well met!"
//! ```
//!
//! `Supported` maps lower-case initiator names (or `*`) to allowed
//! counterpart names (or `*`). A variant without a `Supported` map
//! accepts any pairing. Lower-case keys are accepted as well.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::conversation::DialogueConfig;
use crate::error::{ConverseError, Result};
use crate::types::{InstanceId, ScriptedAction};

const WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// File model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawVariant {
    #[serde(default, rename = "Supported", alias = "supported")]
    supported: Option<HashMap<String, Vec<String>>>,
    #[serde(default, rename = "Conversation", alias = "conversation")]
    conversation: Option<Vec<Vec<String>>>,
    #[serde(default, rename = "LLMConfig", alias = "llmconfig", alias = "dialogue")]
    dialogue: Option<DialogueConfig>,
}

/// One selectable conversation in a definition file.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Lower-cased initiator name (or `*`) to allowed counterparts (or `*`).
    pub supported: HashMap<String, Vec<String>>,
    /// Parsed per-round actions. Empty for a purely dynamic variant.
    pub script: Vec<Vec<ScriptedAction>>,
    /// Dialogue settings, if the file sets any.
    pub dialogue: Option<DialogueConfig>,
}

impl Variant {
    /// Whether `initiator` may run this variant with `participant`.
    #[must_use]
    pub fn supports(&self, initiator: &str, participant: &str) -> bool {
        if self.supported.is_empty() {
            return true;
        }
        let initiator = initiator.to_lowercase();
        let participant = participant.to_lowercase();
        self.supported
            .iter()
            .filter(|(name, _)| *name == WILDCARD || name.to_lowercase() == initiator)
            .flat_map(|(_, allowed)| allowed)
            .any(|name| name == WILDCARD || name.to_lowercase() == participant)
    }
}

/// A parsed definition file.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionFile {
    /// Variants in file order.
    pub variants: Vec<Variant>,
}

impl DefinitionFile {
    /// Parse and validate a definition.
    ///
    /// # Errors
    /// Returns [`ConverseError::Definition`] for invalid YAML, a file with no
    /// variants, or an action line without a `#1`/`#2` marker.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let invalid = |reason: String| ConverseError::Definition {
            path: path.to_path_buf(),
            reason,
        };

        let raw: Vec<RawVariant> = serde_yaml::from_str(text).map_err(|e| invalid(e.to_string()))?;
        if raw.is_empty() {
            return Err(invalid("no variants defined".into()));
        }

        let mut variants = Vec::with_capacity(raw.len());
        for (index, variant) in raw.into_iter().enumerate() {
            let conversation = variant.conversation.unwrap_or_default();
            let mut script = Vec::with_capacity(conversation.len());
            for (round, lines) in conversation.into_iter().enumerate() {
                let mut step = Vec::with_capacity(lines.len());
                for line in lines {
                    let action = ScriptedAction::parse(&line).ok_or_else(|| {
                        invalid(format!(
                            "variant {index}, round {round}: action {line:?} must start with #1 or #2"
                        ))
                    })?;
                    step.push(action);
                }
                script.push(step);
            }
            variants.push(Variant {
                supported: variant
                    .supported
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k.to_lowercase(), v))
                    .collect(),
                script,
                dialogue: variant.dialogue,
            });
        }
        Ok(Self { variants })
    }

    /// Indices of variants usable between the two names.
    #[must_use]
    pub fn supported_variants(&self, initiator: &str, participant: &str) -> Vec<usize> {
        self.variants
            .iter()
            .enumerate()
            .filter(|(_, v)| v.supports(initiator, participant))
            .map(|(i, _)| i)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

/// Lower-case a zone name and replace spaces with underscores.
#[must_use]
pub fn sanitize_zone(zone: &str) -> String {
    zone.trim().replace(' ', "_").to_lowercase()
}

/// Locates and loads definition files under one data directory.
///
/// [`DefinitionLibrary::has_definition`] caches misses so the per-round
/// `converse` check does not stat the filesystem for mobs that never talk.
/// [`DefinitionLibrary::load`] always goes to disk and clears a stale miss
/// when the file has since appeared.
#[derive(Debug)]
pub struct DefinitionLibrary {
    root: PathBuf,
    misses: RwLock<HashSet<String>>,
}

impl DefinitionLibrary {
    /// Library rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            misses: RwLock::new(HashSet::new()),
        }
    }

    /// The data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `"<zone>/<mob id>.yaml"`, relative to the root.
    #[must_use]
    pub fn relative_path(zone: &str, mob_id: InstanceId) -> String {
        format!("{}/{mob_id}.yaml", sanitize_zone(zone))
    }

    /// Whether a definition exists for `(zone, mob_id)`.
    #[must_use]
    pub fn has_definition(&self, zone: &str, mob_id: InstanceId) -> bool {
        let key = Self::relative_path(zone, mob_id);
        if self.misses.read().contains(&key) {
            return false;
        }
        let exists = self.root.join(&key).is_file();
        if !exists {
            self.misses.write().insert(key);
        }
        exists
    }

    /// Load the definition for `(zone, mob_id)`.
    ///
    /// Returns `Ok(None)` when no file exists.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self, zone: &str, mob_id: InstanceId) -> Result<Option<DefinitionFile>> {
        let key = Self::relative_path(zone, mob_id);
        let path = self.root.join(&key);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.misses.write().remove(&key);
        let file = DefinitionFile::parse(&text, &path)?;
        debug!(path = %path.display(), variants = file.variants.len(), "loaded dialogue definition");
        Ok(Some(file))
    }

    /// Drop cached misses.
    pub fn forget_misses(&self) {
        self.misses.write().clear();
    }
}
