//! Idle-tick adapter: drives every conversation once per round.
//!
//! The host calls [`IdleTickAdapter::on_new_round`] from its round hook. For
//! each mob flagged as being in a conversation (one visit per session):
//!
//! 1. a back-reference to a session the registry no longer has is cleared
//! 2. participants that are gone or in different rooms end the session,
//!    with a farewell broadcast when both still exist
//! 3. otherwise the session's actions for this round are dispatched, and a
//!    finished session is released

use std::collections::HashSet;
use std::sync::Arc;

use parley_core::{Conversation, ParticipantRef, ScriptedAction, SessionId, Slot, UserId};
use tracing::{debug, warn};

use crate::registry::ConversationRegistry;
use crate::world::{RoomId, World};

/// Summary of one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sessions visited.
    pub sessions: usize,
    /// Commands handed to the world.
    pub actions_dispatched: usize,
    /// Sessions ended this round.
    pub ended: usize,
    /// Back-references cleared because their session was gone.
    pub cleared_refs: usize,
}

/// A participant as it currently exists in the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveParticipant {
    /// Who it is.
    pub reference: ParticipantRef,
    /// Current display name.
    pub name: String,
    /// Current room.
    pub room: RoomId,
    /// In-room target id, mobs only.
    pub shorthand: Option<String>,
}

/// A resolved command, ready for the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Run as a mob.
    Mob {
        /// Acting mob.
        instance: u64,
        /// Command line.
        command: String,
        /// Rounds of delay.
        delay_rounds: u32,
    },
    /// Run as a player.
    Player {
        /// Acting player.
        user: UserId,
        /// Command line.
        command: String,
    },
}

/// Turn a slot-addressed action into a concrete command.
///
/// `*` is a do-nothing placeholder. ` #1 ` / ` #2 ` become mob shorthand
/// ids, and `sayto` is re-addressed to the counterpart's current name.
/// Commands for mob `#2` run one round late so replies follow the line
/// they answer.
#[must_use]
pub fn resolve_command(action: &ScriptedAction, a: &LiveParticipant, b: &LiveParticipant) -> Option<Dispatch> {
    let command = action.command.trim();
    if command == "*" || command.is_empty() {
        return None;
    }

    let mut command = format!(" {command} ");
    for (marker, party) in [("#1", a), ("#2", b)] {
        if let Some(shorthand) = &party.shorthand {
            command = command.replace(&format!(" {marker} "), &format!(" {shorthand} "));
        }
    }
    let mut command = command.trim().to_string();

    let (actor, target) = match action.speaker {
        Slot::A => (a, b),
        Slot::B => (b, a),
    };
    if let Some(rest) = command.strip_prefix("sayto ") {
        let Some((_, text)) = rest.trim_start().split_once(' ') else {
            debug!(%action, "sayto without text skipped");
            return None;
        };
        command = format!("sayto {} {}", target.name, text.trim_start());
    }

    Some(match actor.reference {
        ParticipantRef::Mob { instance_id } => Dispatch::Mob {
            instance: instance_id,
            command,
            delay_rounds: u32::from(action.speaker == Slot::B),
        },
        ParticipantRef::Player { user_id } => Dispatch::Player { user: user_id, command },
    })
}

/// Round hook for the host.
pub struct IdleTickAdapter {
    registry: Arc<ConversationRegistry>,
    world: Arc<dyn World>,
}

impl std::fmt::Debug for IdleTickAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleTickAdapter").field("registry", &self.registry).finish_non_exhaustive()
    }
}

impl IdleTickAdapter {
    /// Adapter over a registry and the world it was started with.
    #[must_use]
    pub fn new(registry: Arc<ConversationRegistry>, world: Arc<dyn World>) -> Self {
        Self { registry, world }
    }

    /// Advance every conversation for the current round.
    pub async fn on_new_round(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut seen = HashSet::new();

        for instance in self.world.mobs_in_conversation() {
            let Some(id) = self.world.mob(instance).and_then(|m| m.conversation) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            let Some(conversation) = self.registry.conversation(id) else {
                debug!(instance, session = %id, "clearing stale conversation reference");
                self.world.set_mob_conversation(instance, None);
                report.cleared_refs += 1;
                continue;
            };
            report.sessions += 1;

            let a = self.live(conversation.participant_a.reference);
            let b = self.live(conversation.participant_b.reference);
            let (a, b) = match (a, b) {
                (Some(a), Some(b)) if a.room == b.room => (a, b),
                (a, b) => {
                    if let (Some(a), Some(b)) = (&a, &b) {
                        self.say_farewell(id, &conversation, a, b).await;
                    }
                    self.registry.destroy(id);
                    self.release(id, &conversation);
                    report.ended += 1;
                    continue;
                }
            };

            let Some(round) = self.registry.next_actions(id).await else {
                self.release(id, &conversation);
                report.ended += 1;
                continue;
            };
            for action in &round.actions {
                if let Some(dispatch) = resolve_command(action, &a, &b) {
                    self.dispatch(dispatch);
                    report.actions_dispatched += 1;
                }
            }

            if self.registry.is_complete(id) {
                self.release(id, &conversation);
                report.ended += 1;
            }
        }
        report
    }

    fn live(&self, reference: ParticipantRef) -> Option<LiveParticipant> {
        match reference {
            ParticipantRef::Mob { instance_id } => self.world.mob(instance_id).map(|m| LiveParticipant {
                reference,
                name: m.name,
                room: m.room_id,
                shorthand: Some(m.shorthand),
            }),
            ParticipantRef::Player { user_id } => self.world.player(user_id).map(|p| LiveParticipant {
                reference,
                name: p.name,
                room: p.room_id,
                shorthand: None,
            }),
        }
    }

    async fn say_farewell(&self, id: SessionId, conversation: &Conversation, a: &LiveParticipant, b: &LiveParticipant) {
        let Some((slot, _)) = conversation.non_player() else {
            return;
        };
        let speaker = match slot {
            Slot::A => a,
            Slot::B => b,
        };
        match self.registry.end_conversation(id).await {
            Ok(line) if !line.is_empty() => {
                self.world
                    .room_message(speaker.room, &format!("{} says, \"{line}\"", speaker.name));
            }
            Ok(_) => {}
            Err(err) => debug!(session = %id, error = %err, "no farewell"),
        }
    }

    fn dispatch(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Mob { instance, command, delay_rounds } => {
                self.world.mob_command(instance, &command, delay_rounds);
            }
            Dispatch::Player { user, command } => self.world.player_command(user, &command),
        }
    }

    /// Clear mob back-references to `id` and let players type again.
    fn release(&self, id: SessionId, conversation: &Conversation) {
        for participant in [&conversation.participant_a, &conversation.participant_b] {
            match participant.reference {
                ParticipantRef::Mob { instance_id } => {
                    if self.world.mob(instance_id).and_then(|m| m.conversation) == Some(id) {
                        self.world.set_mob_conversation(instance_id, None);
                    }
                }
                ParticipantRef::Player { user_id } => {
                    if self.world.player(user_id).is_some() {
                        self.world.unblock_player_input(user_id);
                    } else {
                        warn!(session = %id, user_id, "player left before conversation ended");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mob(instance: u64, name: &str) -> LiveParticipant {
        LiveParticipant {
            reference: ParticipantRef::mob(instance),
            name: name.into(),
            room: 1,
            shorthand: Some(format!("{name}#{instance}")),
        }
    }

    fn player(user: u64, name: &str) -> LiveParticipant {
        LiveParticipant {
            reference: ParticipantRef::player(user),
            name: name.into(),
            room: 1,
            shorthand: None,
        }
    }

    fn action(line: &str) -> ScriptedAction {
        ScriptedAction::parse(line).expect("valid action")
    }

    #[test]
    fn placeholder_is_skipped() {
        assert_eq!(resolve_command(&action("#1 *"), &mob(1, "merchant"), &mob(2, "guard")), None);
    }

    #[test]
    fn markers_become_shorthand_ids() {
        let resolved = resolve_command(&action("#1 give bread #2 "), &mob(1, "merchant"), &mob(2, "guard"));
        assert_eq!(
            resolved,
            Some(Dispatch::Mob { instance: 1, command: "give bread guard#2".into(), delay_rounds: 0 })
        );
    }

    #[test]
    fn sayto_targets_counterpart_name_and_b_is_delayed() {
        let resolved = resolve_command(&action("#2 sayto #1 Quiet night."), &mob(1, "merchant"), &mob(2, "guard"));
        assert_eq!(
            resolved,
            Some(Dispatch::Mob { instance: 2, command: "sayto merchant Quiet night.".into(), delay_rounds: 1 })
        );
    }

    #[test]
    fn player_slots_run_player_commands() {
        let resolved = resolve_command(&action("#2 emote nods at #1"), &mob(1, "merchant"), &player(9, "Alice"));
        assert_eq!(
            resolved,
            Some(Dispatch::Player { user: 9, command: "emote nods at merchant#1".into() })
        );
        let to_player = resolve_command(&action("#1 sayto #2 Hello there."), &mob(1, "merchant"), &player(9, "Alice"));
        assert_eq!(
            to_player,
            Some(Dispatch::Mob { instance: 1, command: "sayto Alice Hello there.".into(), delay_rounds: 0 })
        );
    }

    #[test]
    fn sayto_without_text_is_dropped() {
        assert_eq!(resolve_command(&action("#1 sayto #2"), &mob(1, "merchant"), &mob(2, "guard")), None);
    }
}
