//! The conversation session and its per-session dialogue settings.
//!
//! A [`Conversation`] is plain data. Locking and scheduling belong to the
//! engine; this module only knows how a session's fields relate to each
//! other (mode, completion, bounded context, staleness).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Participant, Round, ScriptedAction, SessionId, Slot};

/// Context size used when a definition asks for zero or omits it.
pub const DEFAULT_CONTEXT_TURNS: usize = 10;

// ---------------------------------------------------------------------------
// DialogueConfig
// ---------------------------------------------------------------------------

/// Per-variant dialogue settings, read from a variant's `LLMConfig` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Whether generated turns are allowed for this session.
    #[serde(default = "default_true", rename = "Enabled", alias = "enabled")]
    pub enabled: bool,
    /// System prompt that frames every generation.
    #[serde(default, rename = "SystemPrompt", alias = "systemprompt")]
    pub system_prompt: String,
    /// Upper bound on remembered context lines.
    #[serde(default = "default_context_turns", rename = "MaxContextTurns", alias = "maxcontextturns")]
    pub max_context_turns: usize,
    /// Whether participant names are included in the generation context.
    #[serde(default = "default_true", rename = "IncludeNames", alias = "includenames")]
    pub include_names: bool,
    /// Fixed opening line for dynamic sessions. Empty means none.
    #[serde(default, rename = "Greeting", alias = "greeting")]
    pub greeting: String,
    /// Fixed closing line. Empty means one is generated.
    #[serde(default, rename = "Farewell", alias = "farewell")]
    pub farewell: String,
    /// Seconds of inactivity before a dynamic session closes itself.
    #[serde(default = "default_idle_timeout", rename = "IdleTimeout", alias = "idletimeout")]
    pub idle_timeout_secs: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            system_prompt: String::new(),
            max_context_turns: DEFAULT_CONTEXT_TURNS,
            include_names: true,
            greeting: String::new(),
            farewell: String::new(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl DialogueConfig {
    /// Context bound for single utterances.
    #[must_use]
    pub fn context_turns(&self) -> usize {
        if self.max_context_turns == 0 {
            DEFAULT_CONTEXT_TURNS
        } else {
            self.max_context_turns
        }
    }

    /// Context bound when lines are stored as input/response pairs.
    #[must_use]
    pub fn context_pairs(&self) -> usize {
        self.context_turns().saturating_mul(2)
    }

    /// Idle timeout as a chrono duration.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        let secs = i64::try_from(self.idle_timeout_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        Duration::seconds(secs)
    }

    /// The greeting, if one is configured.
    #[must_use]
    pub fn greeting(&self) -> Option<&str> {
        Some(self.greeting.trim()).filter(|g| !g.is_empty())
    }

    /// The farewell, if one is configured.
    #[must_use]
    pub fn farewell(&self) -> Option<&str> {
        Some(self.farewell.trim()).filter(|f| !f.is_empty())
    }
}

fn default_true() -> bool { true }
fn default_context_turns() -> usize { DEFAULT_CONTEXT_TURNS }
fn default_idle_timeout() -> u64 { 300 }

// ---------------------------------------------------------------------------
// Context log
// ---------------------------------------------------------------------------

/// Who produced a context line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextOrigin {
    /// Typed by a human player.
    Human,
    /// Spoken by a mob, scripted or generated.
    NonPlayer,
    /// Injected from the memory store at session start.
    Recollection,
}

/// One remembered utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Where the line came from.
    pub origin: ContextOrigin,
    /// Speaker name, empty for narration.
    pub speaker: String,
    /// The utterance.
    pub text: String,
}

impl ContextEntry {
    /// A line typed by a player.
    #[must_use]
    pub fn human(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: ContextOrigin::Human,
            speaker: speaker.into(),
            text: text.into(),
        }
    }

    /// A line spoken by a mob.
    #[must_use]
    pub fn non_player(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: ContextOrigin::NonPlayer,
            speaker: speaker.into(),
            text: text.into(),
        }
    }

    /// A line recalled from an earlier session.
    #[must_use]
    pub fn recollection(text: impl Into<String>) -> Self {
        Self {
            origin: ContextOrigin::Recollection,
            speaker: String::new(),
            text: text.into(),
        }
    }

    /// Render as `"speaker: text"`, or just the text for narration.
    #[must_use]
    pub fn line(&self) -> String {
        if self.speaker.is_empty() {
            self.text.clone()
        } else {
            format!("{}: {}", self.speaker, self.text)
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Walking a fixed action script.
    Scripted,
    /// Waiting for player text.
    Dynamic,
    /// Finished. Terminal.
    Inactive,
}

/// One active dialogue session between two participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Registry id.
    pub id: SessionId,
    /// The initiator (`#1`).
    pub participant_a: Participant,
    /// The counterpart (`#2`).
    pub participant_b: Participant,
    /// Per-round action lists. Empty for dynamic sessions.
    pub action_script: Vec<Vec<ScriptedAction>>,
    /// Index of the next round in `action_script`.
    pub position: usize,
    /// Dialogue settings from the chosen variant.
    pub dialogue: DialogueConfig,
    /// Bounded utterance history, oldest first.
    pub context_log: Vec<ContextEntry>,
    /// Round the session was created in.
    pub start_round: Round,
    /// Last round in which the session advanced.
    pub last_round_processed: Option<Round>,
    /// Last time anything happened in the session.
    pub last_activity: DateTime<Utc>,
    /// Last successful generation for this session.
    pub last_generation: Option<DateTime<Utc>>,
    /// Whether the opening greeting has been delivered.
    pub has_greeted: bool,
    /// Whether a farewell has been produced.
    pub has_farewelled: bool,
    /// Cleared when the session ends.
    pub active: bool,
    /// `"<zone>/<mob>.yaml:<variant>"`, for rotation and diagnostics.
    pub variant_tag: String,
}

impl Conversation {
    /// Create a fresh, active session.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        participant_a: Participant,
        participant_b: Participant,
        action_script: Vec<Vec<ScriptedAction>>,
        dialogue: DialogueConfig,
        start_round: Round,
        now: DateTime<Utc>,
        variant_tag: impl Into<String>,
    ) -> Self {
        Self {
            id,
            participant_a,
            participant_b,
            action_script,
            position: 0,
            dialogue,
            context_log: Vec::new(),
            start_round,
            last_round_processed: None,
            last_activity: now,
            last_generation: None,
            has_greeted: false,
            has_farewelled: false,
            active: true,
            variant_tag: variant_tag.into(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConversationState {
        if !self.active {
            ConversationState::Inactive
        } else if self.is_scripted() {
            ConversationState::Scripted
        } else {
            ConversationState::Dynamic
        }
    }

    /// Whether this session has an action script.
    #[must_use]
    pub fn is_scripted(&self) -> bool {
        !self.action_script.is_empty()
    }

    /// Whether the script cursor has run off the end.
    #[must_use]
    pub fn script_finished(&self) -> bool {
        self.is_scripted() && self.position >= self.action_script.len()
    }

    /// Whether the session is done, by script exhaustion or deactivation.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.active || self.script_finished()
    }

    /// The participant in `slot`.
    #[must_use]
    pub fn participant(&self, slot: Slot) -> &Participant {
        match slot {
            Slot::A => &self.participant_a,
            Slot::B => &self.participant_b,
        }
    }

    /// The first mob participant and its slot.
    #[must_use]
    pub fn non_player(&self) -> Option<(Slot, &Participant)> {
        [Slot::A, Slot::B]
            .into_iter()
            .map(|slot| (slot, self.participant(slot)))
            .find(|(_, p)| !p.is_player())
    }

    /// The player participant, if any.
    #[must_use]
    pub fn player(&self) -> Option<&Participant> {
        [&self.participant_a, &self.participant_b]
            .into_iter()
            .find(|p| p.is_player())
    }

    /// Append a context line, evicting the oldest beyond `limit`.
    pub fn push_context(&mut self, entry: ContextEntry, limit: usize) {
        self.context_log.push(entry);
        let limit = limit.max(1);
        if self.context_log.len() > limit {
            let excess = self.context_log.len() - limit;
            self.context_log.drain(..excess);
        }
    }

    /// Rendered context lines, oldest first.
    #[must_use]
    pub fn context_lines(&self) -> Vec<String> {
        self.context_log.iter().map(ContextEntry::line).collect()
    }

    /// Time since the last activity.
    #[must_use]
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_activity
    }

    /// Whether the idle timeout has passed.
    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.idle_for(now) > self.dialogue.idle_timeout()
    }

    /// Time left before another generation is allowed, if any.
    #[must_use]
    pub fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Option<Duration> {
        let last = self.last_generation?;
        let remaining = cooldown - (now - last);
        (remaining > Duration::zero()).then_some(remaining)
    }

    /// Rounds since the session last made progress.
    #[must_use]
    pub fn rounds_since_progress(&self, round_now: Round) -> u64 {
        round_now.saturating_sub(self.last_round_processed.unwrap_or(self.start_round))
    }
}
