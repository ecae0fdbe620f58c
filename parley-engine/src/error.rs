//! Dialogue errors surfaced to callers of the registry.

use std::time::Duration;

use parley_core::SessionId;
use parley_llm::{GatewayError, PromptError};
use thiserror::Error;

/// Why a dynamic turn or farewell could not be produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialogueError {
    /// No such session.
    #[error("conversation {0} not found")]
    NotFound(SessionId),

    /// The session has already ended.
    #[error("conversation {0} has ended")]
    Inactive(SessionId),

    /// The session sat idle past its timeout and was closed.
    #[error("conversation {0} timed out")]
    IdleTimeout(SessionId),

    /// Too soon after the previous generation.
    #[error("generation cooling down for another {}ms", remaining.as_millis())]
    Cooldown {
        /// Time left.
        remaining: Duration,
    },

    /// The session's dialogue settings do not allow generation.
    #[error("generated dialogue is disabled for this conversation")]
    GenerationDisabled,

    /// The player switched AI features off.
    #[error("player has opted out of generated dialogue")]
    GenerationOptOut,

    /// Dynamic input arrived for a session without a player.
    #[error("conversation {0} has no player participant")]
    NoPlayer(SessionId),

    /// Context could not be assembled.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// The gateway refused or failed.
    #[error(transparent)]
    Generation(#[from] GatewayError),
}

impl DialogueError {
    /// In-game wording. Never exposes backend details.
    #[must_use]
    pub fn player_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::Inactive(_) | Self::NoPlayer(_) => {
                "They are not talking with you right now."
            }
            Self::IdleTimeout(_) => "They seem to have lost interest in the conversation.",
            Self::Cooldown { .. } => "They are still thinking about what you said.",
            Self::GenerationDisabled | Self::GenerationOptOut => "They have nothing more to say.",
            Self::Prompt(_) | Self::Generation(_) => "They don't seem to have an answer for you.",
        }
    }

    /// Whether this is an expected "not now" condition rather than a fault.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Generation(err) => err.is_fast_fail(),
            Self::Prompt(_) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_messages_hide_backend_errors() {
        let err = DialogueError::Generation(GatewayError::Status { status: 500, body: "trace".into() });
        assert!(!err.player_message().contains("500"));
        assert!(!err.is_expected());
        assert!(DialogueError::Generation(GatewayError::Disabled).is_expected());
        assert!(DialogueError::Cooldown { remaining: Duration::from_millis(300) }.is_expected());
    }
}
