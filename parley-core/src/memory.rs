//! Cross-session memory: what an NPC remembers about someone it talked to.
//!
//! Records are keyed by `(npc name, other party name)`, both compared
//! case-insensitively, and outlive the conversations that produced them.
//! A record older than the expiration window is treated as gone by
//! [`MemoryStore::recall`] and physically removed by [`MemoryStore::sweep`].
//!
//! Topic extraction is a deliberately small heuristic: the first three words
//! of each sufficiently long line a human typed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MemorySettings;
use crate::conversation::{ContextEntry, ContextOrigin, Conversation};

/// Words taken from a human line to form a topic.
const TOPIC_WORDS: usize = 3;

/// What one NPC remembers about one counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Lower-cased NPC name.
    pub npc: String,
    /// Lower-cased counterpart name.
    pub other: String,
    /// When the last captured session ended.
    pub last_interaction: DateTime<Utc>,
    /// Distinct topics, oldest first.
    pub recent_topics: Vec<String>,
    /// Raw lines from the last few turn-pairs.
    pub recent_context: Vec<String>,
    /// Number of sessions captured for this pair.
    pub interaction_count: u32,
}

impl MemoryRecord {
    fn new(npc: String, other: String, now: DateTime<Utc>) -> Self {
        Self {
            npc,
            other,
            last_interaction: now,
            recent_topics: Vec::new(),
            recent_context: Vec::new(),
            interaction_count: 0,
        }
    }

    /// Time since the last interaction.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_interaction
    }

    /// Context lines to seed a new session with: a summary line followed by
    /// the remembered raw lines.
    #[must_use]
    pub fn seed_context(&self, now: DateTime<Utc>) -> Vec<ContextEntry> {
        let mut entries = Vec::with_capacity(self.recent_context.len() + 1);
        entries.push(ContextEntry::recollection(self.recollection(now)));
        entries.extend(self.recent_context.iter().cloned().map(ContextEntry::recollection));
        entries
    }

    /// Human-readable summary, e.g.
    /// `"You have spoken with alice before, 2 hours ago. Previously discussed: the old mill."`
    #[must_use]
    pub fn recollection(&self, now: DateTime<Utc>) -> String {
        let mut line = format!(
            "You have spoken with {} before, {} ago.",
            self.other,
            humanize(self.age(now))
        );
        if !self.recent_topics.is_empty() {
            line.push_str(" Previously discussed: ");
            line.push_str(&self.recent_topics.join(", "));
            line.push('.');
        }
        line
    }
}

fn humanize(elapsed: Duration) -> String {
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };
    if elapsed < Duration::minutes(1) {
        "moments".to_string()
    } else if elapsed < Duration::hours(1) {
        plural(elapsed.num_minutes(), "minute")
    } else if elapsed < Duration::days(1) {
        plural(elapsed.num_hours(), "hour")
    } else {
        plural(elapsed.num_days(), "day")
    }
}

/// First few words of a human line, lower-cased and stripped of punctuation.
#[must_use]
pub fn extract_topic(text: &str) -> Option<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .take(TOPIC_WORDS)
        .collect();
    (words.len() == TOPIC_WORDS).then(|| words.join(" "))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Internally synchronized map of memory records.
#[derive(Debug)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, HashMap<String, MemoryRecord>>>,
    expiration: Duration,
    max_topics: usize,
    max_context_lines: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&MemorySettings::default())
    }
}

impl MemoryStore {
    /// Empty store using the given limits.
    #[must_use]
    pub fn new(settings: &MemorySettings) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            expiration: settings.expiration(),
            max_topics: settings.max_topics.max(1),
            max_context_lines: settings.max_context_pairs.saturating_mul(2),
        }
    }

    /// Expiration window.
    #[must_use]
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Whether a record is past its window. The boundary itself is expired.
    #[must_use]
    pub fn is_expired(&self, record: &MemoryRecord, now: DateTime<Utc>) -> bool {
        record.age(now) >= self.expiration
    }

    /// Record the end of a conversation.
    ///
    /// Returns `false` when the session has no usable name pair.
    pub fn capture(&self, conversation: &Conversation, now: DateTime<Utc>) -> bool {
        let Some((slot, npc)) = conversation.non_player() else {
            return false;
        };
        let other = conversation.participant(slot.other());
        let npc_key = npc.display_name.trim().to_lowercase();
        let other_key = other.display_name.trim().to_lowercase();
        if npc_key.is_empty() || other_key.is_empty() {
            return false;
        }

        let fresh: Vec<&ContextEntry> = conversation
            .context_log
            .iter()
            .filter(|e| e.origin != ContextOrigin::Recollection)
            .collect();
        let recent: Vec<String> = fresh
            .iter()
            .skip(fresh.len().saturating_sub(self.max_context_lines))
            .map(|e| e.line())
            .collect();
        let topics: Vec<String> = fresh
            .iter()
            .filter(|e| e.origin == ContextOrigin::Human)
            .filter_map(|e| extract_topic(&e.text))
            .collect();

        let mut records = self.records.write();
        let record = records
            .entry(npc_key.clone())
            .or_default()
            .entry(other_key.clone())
            .or_insert_with(|| MemoryRecord::new(npc_key, other_key, now));

        record.last_interaction = now;
        record.interaction_count = record.interaction_count.saturating_add(1);
        record.recent_context = recent;
        for topic in topics {
            if record.recent_topics.contains(&topic) {
                continue;
            }
            record.recent_topics.push(topic);
            if record.recent_topics.len() > self.max_topics {
                record.recent_topics.remove(0);
            }
        }
        debug!(
            npc = %record.npc,
            other = %record.other,
            topics = record.recent_topics.len(),
            "captured conversation memory"
        );
        true
    }

    /// The live record for a pair, if any.
    #[must_use]
    pub fn recall(&self, npc: &str, other: &str, now: DateTime<Utc>) -> Option<MemoryRecord> {
        let records = self.records.read();
        let record = records
            .get(&npc.trim().to_lowercase())?
            .get(&other.trim().to_lowercase())?;
        (!self.is_expired(record, now)).then(|| record.clone())
    }

    /// Remove expired records and empty NPC entries. Returns how many
    /// records were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write();
        let mut removed = 0;
        for by_other in records.values_mut() {
            let before = by_other.len();
            by_other.retain(|_, r| r.age(now) < self.expiration);
            removed += before - by_other.len();
        }
        records.retain(|_, by_other| !by_other.is_empty());
        if removed > 0 {
            debug!(removed, "swept expired conversation memories");
        }
        removed
    }

    /// Number of stored records, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().values().map(HashMap::len).sum()
    }

    /// Whether the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
