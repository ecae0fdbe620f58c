//! # Parley Core
//!
//! Game-agnostic data model for NPC conversations in a tick-driven MUD.
//!
//! A [`Conversation`] pairs two participants (two mobs, or a mob and a
//! player) and is driven either by a pre-authored action script loaded from
//! a [`definition`] file, or turn by turn through a text-generation backend.
//! When a session ends, the [`MemoryStore`] keeps a short recollection of it
//! so the next meeting between the same pair can pick up where they left off.
//!
//! This crate holds no threads and performs no network I/O. Scheduling,
//! world access and generation live in `parley-engine` and `parley-llm`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod conversation;
pub mod definition;
pub mod error;
pub mod memory;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DialogueSettings, GeneralConfig, MemorySettings};
pub use conversation::{ContextEntry, ContextOrigin, Conversation, ConversationState, DialogueConfig};
pub use definition::{DefinitionFile, DefinitionLibrary, Variant};
pub use error::{ConverseError, Result};
pub use memory::{MemoryRecord, MemoryStore};
pub use types::*;
