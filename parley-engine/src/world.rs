//! The host world, as the conversation engine sees it.
//!
//! All methods are synchronous and must be cheap: they are called from the
//! round tick and, under the session store's read lock, from the
//! maintenance sweep. Implementations must never call back into the
//! registry.

use std::collections::HashMap;

use parking_lot::RwLock;
use parley_core::{InstanceId, Round, SessionId, UserId};

/// Room identifier.
pub type RoomId = u64;

/// What the engine needs to know about a mob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobInfo {
    /// Live instance id.
    pub instance_id: InstanceId,
    /// Template id, used to find the definition file.
    pub mob_id: u64,
    /// Display name.
    pub name: String,
    /// Zone the mob belongs to.
    pub zone: String,
    /// Current room.
    pub room_id: RoomId,
    /// Sneaking or otherwise unseen.
    pub hidden: bool,
    /// Conversation back-reference.
    pub conversation: Option<SessionId>,
    /// Unambiguous in-room target, e.g. `"guard#2"`.
    pub shorthand: String,
}

/// What the engine needs to know about a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    /// Account id.
    pub user_id: UserId,
    /// Character name.
    pub name: String,
    /// Current room.
    pub room_id: RoomId,
    /// Sneaking or otherwise unseen.
    pub hidden: bool,
}

/// Port to the host MUD.
pub trait World: Send + Sync {
    /// Current simulation round.
    fn current_round(&self) -> Round;

    /// Look up a live mob.
    fn mob(&self, instance: InstanceId) -> Option<MobInfo>;

    /// Look up a connected player.
    fn player(&self, user: UserId) -> Option<PlayerInfo>;

    /// Every mob whose conversation back-reference is set.
    fn mobs_in_conversation(&self) -> Vec<InstanceId>;

    /// Mobs in a room.
    fn room_mobs(&self, room: RoomId) -> Vec<InstanceId>;

    /// Players in a room.
    fn room_players(&self, room: RoomId) -> Vec<UserId>;

    /// Set or clear a mob's conversation back-reference.
    fn set_mob_conversation(&self, instance: InstanceId, conversation: Option<SessionId>);

    /// Queue a command for a mob, `delay_rounds` from now.
    fn mob_command(&self, instance: InstanceId, command: &str, delay_rounds: u32);

    /// Run a command as a player.
    fn player_command(&self, user: UserId, command: &str);

    /// Let a player type again after a conversation.
    fn unblock_player_input(&self, user: UserId);

    /// Show text to everyone in a room.
    fn room_message(&self, room: RoomId, text: &str);

    /// Read a per-player setting.
    fn player_setting(&self, user: UserId, key: &str) -> Option<String>;

    /// Write a per-player setting. `None` removes it.
    fn set_player_setting(&self, user: UserId, key: &str, value: Option<&str>);
}

// ---------------------------------------------------------------------------
// In-memory world
// ---------------------------------------------------------------------------

/// Something the engine asked the world to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    /// `mob_command`.
    MobCommand {
        /// Acting mob.
        instance: InstanceId,
        /// Command line.
        command: String,
        /// Rounds of delay.
        delay_rounds: u32,
    },
    /// `player_command`.
    PlayerCommand {
        /// Acting player.
        user: UserId,
        /// Command line.
        command: String,
    },
    /// `unblock_player_input`.
    Unblocked(UserId),
    /// `room_message`.
    RoomMessage {
        /// Target room.
        room: RoomId,
        /// Text shown.
        text: String,
    },
}

#[derive(Debug, Default)]
struct WorldState {
    round: Round,
    mobs: HashMap<InstanceId, MobInfo>,
    players: HashMap<UserId, PlayerInfo>,
    settings: HashMap<(UserId, String), String>,
    events: Vec<WorldEvent>,
}

/// Self-contained [`World`] for tests, benchmarks and tooling.
///
/// Records every side effect as a [`WorldEvent`].
#[derive(Debug, Default)]
pub struct InMemoryWorld {
    state: RwLock<WorldState>,
}

impl InMemoryWorld {
    /// Empty world at round 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mob. The shorthand defaults to `"<name>#<instance>"`.
    pub fn spawn_mob(&self, instance: InstanceId, mob_id: u64, name: &str, zone: &str, room: RoomId) {
        self.state.write().mobs.insert(
            instance,
            MobInfo {
                instance_id: instance,
                mob_id,
                name: name.to_string(),
                zone: zone.to_string(),
                room_id: room,
                hidden: false,
                conversation: None,
                shorthand: format!("{name}#{instance}"),
            },
        );
    }

    /// Remove a mob.
    pub fn despawn_mob(&self, instance: InstanceId) {
        self.state.write().mobs.remove(&instance);
    }

    /// Add a player.
    pub fn connect_player(&self, user: UserId, name: &str, room: RoomId) {
        self.state.write().players.insert(
            user,
            PlayerInfo {
                user_id: user,
                name: name.to_string(),
                room_id: room,
                hidden: false,
            },
        );
    }

    /// Remove a player.
    pub fn disconnect_player(&self, user: UserId) {
        self.state.write().players.remove(&user);
    }

    /// Move a mob to another room.
    pub fn move_mob(&self, instance: InstanceId, room: RoomId) {
        if let Some(mob) = self.state.write().mobs.get_mut(&instance) {
            mob.room_id = room;
        }
    }

    /// Move a player to another room.
    pub fn move_player(&self, user: UserId, room: RoomId) {
        if let Some(player) = self.state.write().players.get_mut(&user) {
            player.room_id = room;
        }
    }

    /// Hide or reveal a mob.
    pub fn set_mob_hidden(&self, instance: InstanceId, hidden: bool) {
        if let Some(mob) = self.state.write().mobs.get_mut(&instance) {
            mob.hidden = hidden;
        }
    }

    /// Hide or reveal a player.
    pub fn set_player_hidden(&self, user: UserId, hidden: bool) {
        if let Some(player) = self.state.write().players.get_mut(&user) {
            player.hidden = hidden;
        }
    }

    /// Advance the round counter by one. Returns the new round.
    pub fn next_round(&self) -> Round {
        let mut state = self.state.write();
        state.round += 1;
        state.round
    }

    /// Jump the round counter.
    pub fn set_round(&self, round: Round) {
        self.state.write().round = round;
    }

    /// Take every recorded side effect.
    pub fn drain_events(&self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.state.write().events)
    }

    fn push(&self, event: WorldEvent) {
        self.state.write().events.push(event);
    }
}

impl World for InMemoryWorld {
    fn current_round(&self) -> Round {
        self.state.read().round
    }

    fn mob(&self, instance: InstanceId) -> Option<MobInfo> {
        self.state.read().mobs.get(&instance).cloned()
    }

    fn player(&self, user: UserId) -> Option<PlayerInfo> {
        self.state.read().players.get(&user).cloned()
    }

    fn mobs_in_conversation(&self) -> Vec<InstanceId> {
        let state = self.state.read();
        let mut ids: Vec<_> = state
            .mobs
            .values()
            .filter(|m| m.conversation.is_some())
            .map(|m| m.instance_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn room_mobs(&self, room: RoomId) -> Vec<InstanceId> {
        let state = self.state.read();
        let mut ids: Vec<_> = state
            .mobs
            .values()
            .filter(|m| m.room_id == room)
            .map(|m| m.instance_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn room_players(&self, room: RoomId) -> Vec<UserId> {
        let state = self.state.read();
        let mut ids: Vec<_> = state
            .players
            .values()
            .filter(|p| p.room_id == room)
            .map(|p| p.user_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn set_mob_conversation(&self, instance: InstanceId, conversation: Option<SessionId>) {
        if let Some(mob) = self.state.write().mobs.get_mut(&instance) {
            mob.conversation = conversation;
        }
    }

    fn mob_command(&self, instance: InstanceId, command: &str, delay_rounds: u32) {
        self.push(WorldEvent::MobCommand {
            instance,
            command: command.to_string(),
            delay_rounds,
        });
    }

    fn player_command(&self, user: UserId, command: &str) {
        self.push(WorldEvent::PlayerCommand {
            user,
            command: command.to_string(),
        });
    }

    fn unblock_player_input(&self, user: UserId) {
        self.push(WorldEvent::Unblocked(user));
    }

    fn room_message(&self, room: RoomId, text: &str) {
        self.push(WorldEvent::RoomMessage {
            room,
            text: text.to_string(),
        });
    }

    fn player_setting(&self, user: UserId, key: &str) -> Option<String> {
        self.state.read().settings.get(&(user, key.to_string())).cloned()
    }

    fn set_player_setting(&self, user: UserId, key: &str, value: Option<&str>) {
        let mut state = self.state.write();
        match value {
            Some(v) => {
                state.settings.insert((user, key.to_string()), v.to_string());
            }
            None => {
                state.settings.remove(&(user, key.to_string()));
            }
        }
    }
}
