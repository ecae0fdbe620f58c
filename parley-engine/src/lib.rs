//! # parley-engine: Conversation Engine for Tick-Driven MUDs
//!
//! Glues the game-agnostic [`parley_core`] model and the [`parley_llm`]
//! gateway to a host world.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Host MUD                     │
//! │   round tick ──► IdleTickAdapter             │
//! │   `converse` ──► commands::converse          │
//! │   player say ──► registry.process_player_input│
//! │         │                                    │
//! │         ▼                                    │
//! │  ┌──────────────────────────────────────┐    │
//! │  │ ConversationRegistry                 │    │
//! │  │  SessionStore ─ Machine ─ Reaper     │    │
//! │  └────────┬───────────────┬─────────────┘    │
//! │           ▼               ▼                  │
//! │     MemoryStore    GenerationGateway         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The host implements [`World`]; everything else is owned here.
//!
//! ## Modules
//!
//! - `world`: the port through which the engine sees mobs, players, rooms
//! - `store`: internally synchronized session map
//! - `machine`: per-round advancement and generated turns
//! - `registry`: session lifecycle (attempt, advance, destroy, shutdown)
//! - `reaper`: destroy worker pool and memory sweeper
//! - `tick`: once-per-round driver for mobs in conversation
//! - `commands`: `ai` toggle and `converse` mob command

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod config;
pub mod error;
pub mod machine;
pub mod reaper;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod tick;
pub mod world;

pub use config::EngineConfig;
pub use error::DialogueError;
pub use registry::{
    ConversationRegistry, ConversationRequest, RegistryStats, RoundActions, USAGE_SETTING_KEY,
};
pub use tick::{IdleTickAdapter, TickReport};
pub use world::{InMemoryWorld, MobInfo, PlayerInfo, RoomId, World, WorldEvent};
