//! Identity types shared by every Parley crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Simulation round counter, as reported by the host world.
pub type Round = u64;

/// Identifier of a mob instance inside the host world.
pub type InstanceId = u64;

/// Identifier of a connected player account.
pub type UserId = u64;

/// Process-unique conversation identifier.
///
/// Ids are handed out from 1 upward and never reused while the process runs.
/// "No session" is expressed with `Option<SessionId>`, never with a zero id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a conversation something refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// The initiator, written `#1` in dialogue files.
    A,
    /// The counterpart, written `#2` in dialogue files.
    B,
}

impl Slot {
    /// The opposite slot.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Marker used in dialogue files and in resolved action strings.
    #[must_use]
    pub fn marker(self) -> &'static str {
        match self {
            Self::A => "#1",
            Self::B => "#2",
        }
    }

    /// Parse a `#1` / `#2` marker.
    #[must_use]
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "#1" => Some(Self::A),
            "#2" => Some(Self::B),
            _ => None,
        }
    }
}

/// Kind-tagged reference to a conversation participant.
///
/// The kind is fixed when the reference is built, so resolving a participant
/// never needs to guess whether an id names a mob or a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantRef {
    /// An AI-controlled mob.
    Mob {
        /// World instance id of the mob.
        instance_id: InstanceId,
    },
    /// A human-controlled player character.
    Player {
        /// Account id of the player.
        user_id: UserId,
    },
}

impl ParticipantRef {
    /// Shorthand for a mob reference.
    #[must_use]
    pub fn mob(instance_id: InstanceId) -> Self {
        Self::Mob { instance_id }
    }

    /// Shorthand for a player reference.
    #[must_use]
    pub fn player(user_id: UserId) -> Self {
        Self::Player { user_id }
    }

    /// Whether this participant is human-controlled.
    #[must_use]
    pub fn is_player(&self) -> bool {
        matches!(self, Self::Player { .. })
    }

    /// The mob instance id, if this is a mob.
    #[must_use]
    pub fn mob_instance(&self) -> Option<InstanceId> {
        match self {
            Self::Mob { instance_id } => Some(*instance_id),
            Self::Player { .. } => None,
        }
    }

    /// The player account id, if this is a player.
    #[must_use]
    pub fn player_id(&self) -> Option<UserId> {
        match self {
            Self::Player { user_id } => Some(*user_id),
            Self::Mob { .. } => None,
        }
    }
}

impl fmt::Display for ParticipantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mob { instance_id } => write!(f, "mob:{instance_id}"),
            Self::Player { user_id } => write!(f, "player:{user_id}"),
        }
    }
}

/// One side of a conversation: who it is and what they are called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// World reference.
    pub reference: ParticipantRef,
    /// Name used in prompts, memory keys and `sayto` targets.
    pub display_name: String,
}

impl Participant {
    /// Build a participant.
    #[must_use]
    pub fn new(reference: ParticipantRef, display_name: impl Into<String>) -> Self {
        Self {
            reference,
            display_name: display_name.into(),
        }
    }

    /// Whether this participant is human-controlled.
    #[must_use]
    pub fn is_player(&self) -> bool {
        self.reference.is_player()
    }
}

/// One scripted command, issued by one slot during one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedAction {
    /// Who performs the command.
    pub speaker: Slot,
    /// Command text, without the slot marker.
    pub command: String,
}

impl ScriptedAction {
    /// Reserved command prefix for an embedded generation turn.
    pub const GENERATE_PREFIX: &'static str = "llm ";

    /// Parse `"#1 emote waves"` style lines.
    ///
    /// Returns `None` when the marker is missing or the command is empty.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let (marker, command) = line.trim().split_once(' ')?;
        let speaker = Slot::from_marker(marker)?;
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        Some(Self {
            speaker,
            command: command.to_string(),
        })
    }

    /// The generation prompt, if this is an embedded `llm` turn.
    #[must_use]
    pub fn generation_prompt(&self) -> Option<&str> {
        self.command
            .strip_prefix(Self::GENERATE_PREFIX)
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Whether this is an embedded `llm` turn (even an empty one).
    #[must_use]
    pub fn is_generation(&self) -> bool {
        self.command == Self::GENERATE_PREFIX.trim_end() || self.command.starts_with(Self::GENERATE_PREFIX)
    }
}

impl fmt::Display for ScriptedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.speaker.marker(), self.command)
    }
}
