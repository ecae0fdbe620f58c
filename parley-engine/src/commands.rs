//! In-game commands backed by the engine.
//!
//! - `ai` (player): toggle generated dialogue for that player
//! - `converse` (mob): start a conversation with someone in the room

use parley_core::{InstanceId, ParticipantRef, SessionId, UserId};
use tracing::debug;

use crate::registry::{ConversationRegistry, ConversationRequest};
use crate::world::World;

/// Per-player setting that disables generated dialogue when `"true"`.
pub const GENERATION_OPT_OUT_KEY: &str = "llm_disabled";

const ENABLED_MESSAGE: &str = "AI-powered features enabled! NPCs can now use LLM responses.";
const DISABLED_MESSAGE: &str = "AI-powered features disabled! NPCs will use only scripted responses.";

/// Whether a player has switched generated dialogue off.
#[must_use]
pub fn generation_opted_out(world: &dyn World, user: UserId) -> bool {
    world
        .player_setting(user, GENERATION_OPT_OUT_KEY)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Flip a player's opt-out and return the message to show them.
///
/// Returns `None` if the player is not connected.
pub fn toggle_generation(world: &dyn World, user: UserId) -> Option<&'static str> {
    world.player(user)?;
    if generation_opted_out(world, user) {
        world.set_player_setting(user, GENERATION_OPT_OUT_KEY, None);
        debug!(user, "generated dialogue enabled");
        Some(ENABLED_MESSAGE)
    } else {
        world.set_player_setting(user, GENERATION_OPT_OUT_KEY, Some("true"));
        debug!(user, "generated dialogue disabled");
        Some(DISABLED_MESSAGE)
    }
}

/// Have a mob strike up a conversation with someone in its room.
///
/// Visible, idle mobs are tried first, then visible players. The first
/// pairing the registry accepts wins.
pub fn converse(
    registry: &ConversationRegistry,
    world: &dyn World,
    instance: InstanceId,
    force_variant: Option<usize>,
) -> Option<SessionId> {
    let mob = world.mob(instance)?;
    if mob.hidden || mob.conversation.is_some() || !registry.has_definition(mob.mob_id, &mob.zone) {
        return None;
    }

    let request = |participant: ParticipantRef| ConversationRequest {
        initiator_mob_id: mob.mob_id,
        initiator: ParticipantRef::mob(instance),
        initiator_name: String::new(),
        participant,
        participant_name: String::new(),
        zone: mob.zone.clone(),
        force_variant,
    };

    let mobs = world
        .room_mobs(mob.room_id)
        .into_iter()
        .filter(|&other| other != instance)
        .filter(|&other| world.mob(other).is_some_and(|m| !m.hidden && m.conversation.is_none()))
        .map(ParticipantRef::mob);
    let players = world
        .room_players(mob.room_id)
        .into_iter()
        .filter(|&user| world.player(user).is_some_and(|p| !p.hidden))
        .map(ParticipantRef::player);

    mobs.chain(players)
        .find_map(|participant| registry.attempt_conversation(request(participant)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::InMemoryWorld;

    #[test]
    fn toggle_round_trips_setting() {
        let world = InMemoryWorld::new();
        world.connect_player(9, "Alice", 1);
        assert!(!generation_opted_out(&world, 9));

        assert_eq!(toggle_generation(&world, 9), Some(DISABLED_MESSAGE));
        assert!(generation_opted_out(&world, 9));
        assert_eq!(world.player_setting(9, GENERATION_OPT_OUT_KEY).as_deref(), Some("true"));

        assert_eq!(toggle_generation(&world, 9), Some(ENABLED_MESSAGE));
        assert!(!generation_opted_out(&world, 9));
        assert!(world.player_setting(9, GENERATION_OPT_OUT_KEY).is_none());
    }

    #[test]
    fn toggle_needs_a_connected_player() {
        let world = InMemoryWorld::new();
        assert_eq!(toggle_generation(&world, 3), None);
    }
}
