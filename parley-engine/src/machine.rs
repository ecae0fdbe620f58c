//! Conversation state machine.
//!
//! ```text
//!   Scripted ──(position reaches end)──► Inactive
//!   Dynamic  ──(idle timeout / farewell)──► Inactive
//! ```
//!
//! [`begin_round`] is the synchronous half: it applies the once-per-round
//! guard and moves the cursor while the caller holds the session lock.
//! [`Machine`] is the asynchronous half: it resolves generated turns with
//! the lock released, re-locking only to record results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_core::{Clock, ContextEntry, Conversation, Round, ScriptedAction, Slot, UserId};
use parley_llm::prompt::{self, ContextSpec};
use parley_llm::GenerationGateway;
use tracing::{debug, warn};

use crate::commands::generation_opted_out;
use crate::error::DialogueError;
use crate::store::SessionHandle;
use crate::world::World;

// ---------------------------------------------------------------------------
// Round advancement
// ---------------------------------------------------------------------------

/// What one round of a session should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundPlan {
    /// Already advanced this round.
    AlreadyProcessed,
    /// Dynamic session waiting for player input.
    AwaitingInput,
    /// Dynamic session closed for inactivity this round.
    TimedOut,
    /// Script exhausted or session inactive.
    Finished,
    /// Actions to perform this round, before generation is resolved.
    Step(Vec<ScriptedAction>),
}

/// Advance `conversation` for `round`. Call with the session lock held.
pub fn begin_round(conversation: &mut Conversation, round: Round, now: DateTime<Utc>) -> RoundPlan {
    if !conversation.active {
        return RoundPlan::Finished;
    }
    if conversation.last_round_processed == Some(round) {
        return RoundPlan::AlreadyProcessed;
    }
    conversation.last_round_processed = Some(round);

    if !conversation.is_scripted() {
        if conversation.is_idle(now) {
            conversation.active = false;
            return RoundPlan::TimedOut;
        }
        return RoundPlan::AwaitingInput;
    }

    let Some(step) = conversation.action_script.get(conversation.position).cloned() else {
        conversation.active = false;
        return RoundPlan::Finished;
    };
    conversation.position += 1;
    conversation.last_activity = now;
    RoundPlan::Step(step)
}

/// The spoken part of a `say` / `sayto <target>` command.
#[must_use]
pub fn spoken_text(command: &str) -> Option<&str> {
    let text = if let Some(rest) = command.strip_prefix("say ") {
        rest
    } else {
        let rest = command.strip_prefix("sayto ")?;
        rest.trim_start().split_once(' ')?.1
    };
    Some(text.trim()).filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Generated turns
// ---------------------------------------------------------------------------

/// Everything a generation needs, copied out from under the session lock.
struct TurnContext {
    context: Vec<String>,
    speaker: String,
    listener: String,
    player: Option<UserId>,
}

fn turn_context(conversation: &Conversation, speaker: Slot) -> Result<TurnContext, DialogueError> {
    let history = conversation.context_lines();
    let context = prompt::build_context(&ContextSpec {
        system_prompt: &conversation.dialogue.system_prompt,
        first_name: &conversation.participant_a.display_name,
        second_name: &conversation.participant_b.display_name,
        include_names: conversation.dialogue.include_names,
        history: &history,
    })?;
    Ok(TurnContext {
        context,
        speaker: conversation.participant(speaker).display_name.clone(),
        listener: conversation.participant(speaker.other()).display_name.clone(),
        player: conversation.player().and_then(|p| p.reference.player_id()),
    })
}

/// Resolves generated turns for sessions.
pub struct Machine {
    gateway: Arc<GenerationGateway>,
    world: Arc<dyn World>,
    clock: Arc<dyn Clock>,
    cooldown: chrono::Duration,
}

impl Machine {
    /// Machine using the given collaborators.
    #[must_use]
    pub fn new(
        gateway: Arc<GenerationGateway>,
        world: Arc<dyn World>,
        clock: Arc<dyn Clock>,
        cooldown: chrono::Duration,
    ) -> Self {
        Self {
            gateway,
            world,
            clock,
            cooldown,
        }
    }

    fn opted_out(&self, player: Option<UserId>) -> bool {
        player.is_some_and(|user| generation_opted_out(self.world.as_ref(), user))
    }

    /// Replace every `llm <prompt>` action in `step` with a generated
    /// `sayto` line. Actions whose generation fails are dropped.
    ///
    /// The cooldown is checked once per step: a step that starts inside
    /// the cooldown drops all of its generated lines.
    pub async fn resolve_step(&self, session: &SessionHandle, step: Vec<ScriptedAction>) -> Vec<ScriptedAction> {
        let cooling = session.lock().cooldown_remaining(self.clock.now(), self.cooldown);
        let mut resolved = Vec::with_capacity(step.len());
        for action in step {
            if !action.is_generation() {
                self.record_scripted(session, &action);
                resolved.push(action);
                continue;
            }
            if let Some(remaining) = cooling {
                debug!(remaining_ms = remaining.num_milliseconds(), "generated line dropped during cooldown");
                continue;
            }
            match self.generate_line(session, &action).await {
                Ok(text) => resolved.push(ScriptedAction {
                    speaker: action.speaker,
                    command: format!("sayto {} {text}", action.speaker.other().marker()),
                }),
                Err(err) if err.is_expected() => {
                    debug!(error = %err, "generated line dropped");
                }
                Err(err) => {
                    warn!(error = %err, "generated line dropped");
                }
            }
        }
        resolved
    }

    fn record_scripted(&self, session: &SessionHandle, action: &ScriptedAction) {
        let Some(text) = spoken_text(&action.command) else {
            return;
        };
        let mut c = session.lock();
        let speaker = c.participant(action.speaker);
        let entry = if speaker.is_player() {
            ContextEntry::human(speaker.display_name.clone(), text)
        } else {
            ContextEntry::non_player(speaker.display_name.clone(), text)
        };
        let limit = c.dialogue.context_turns();
        c.push_context(entry, limit);
    }

    async fn generate_line(&self, session: &SessionHandle, action: &ScriptedAction) -> Result<String, DialogueError> {
        let prompt = action.generation_prompt().ok_or(DialogueError::GenerationDisabled)?;
        let turn = {
            let c = session.lock();
            if !c.dialogue.enabled {
                return Err(DialogueError::GenerationDisabled);
            }
            turn_context(&c, action.speaker)?
        };
        if self.opted_out(turn.player) {
            return Err(DialogueError::GenerationOptOut);
        }

        let generation = self.gateway.generate(prompt, &turn.context, turn.player).await?;
        let text = prompt::clean_reply(&generation.text, &turn.speaker);

        let now = self.clock.now();
        let mut c = session.lock();
        c.last_generation = Some(now);
        c.last_activity = now;
        let limit = c.dialogue.context_turns();
        c.push_context(ContextEntry::non_player(turn.speaker, text.clone()), limit);
        Ok(text)
    }

    /// Answer a player's line in a dynamic session.
    ///
    /// The first reply is prefixed with the configured greeting. If
    /// generation fails on that first turn the greeting alone is returned.
    ///
    /// # Errors
    /// Idle timeout, cooldown, opt-out, disabled dialogue, or a gateway
    /// failure after the greeting has already been used.
    pub async fn reply(&self, session: &SessionHandle, input: &str) -> Result<String, DialogueError> {
        let now = self.clock.now();
        let (turn, greeting) = {
            let mut c = session.lock();
            if !c.active {
                return Err(DialogueError::Inactive(c.id));
            }
            if c.is_idle(now) {
                c.active = false;
                return Err(DialogueError::IdleTimeout(c.id));
            }
            let (npc_slot, player_name) = match (c.non_player(), c.player()) {
                (Some((slot, _)), Some(player)) => (slot, player.display_name.clone()),
                _ => return Err(DialogueError::NoPlayer(c.id)),
            };
            if !c.dialogue.enabled {
                return Err(DialogueError::GenerationDisabled);
            }
            if let Some(remaining) = c.cooldown_remaining(now, self.cooldown) {
                return Err(DialogueError::Cooldown {
                    remaining: remaining.to_std().unwrap_or_default(),
                });
            }
            c.last_activity = now;
            let turn = turn_context(&c, npc_slot)?;
            let limit = c.dialogue.context_pairs();
            c.push_context(ContextEntry::human(player_name, input.trim()), limit);
            let greeting = (!c.has_greeted)
                .then(|| c.dialogue.greeting().map(str::to_string))
                .flatten();
            c.has_greeted = true;
            (turn, greeting)
        };

        let generated = if self.opted_out(turn.player) {
            Err(DialogueError::GenerationOptOut)
        } else {
            let prompt = prompt::render_template(
                prompt::REPLY_PROMPT,
                &[
                    ("npc_name", &turn.speaker),
                    ("other_name", &turn.listener),
                    ("input", input.trim()),
                ],
            );
            self.gateway
                .generate(&prompt, &turn.context, turn.player)
                .await
                .map(|g| prompt::clean_reply(&g.text, &turn.speaker))
                .map_err(DialogueError::from)
        };

        let reply = match (generated, greeting) {
            (Ok(text), Some(greeting)) => format!("{greeting} {text}"),
            (Ok(text), None) => text,
            (Err(err), Some(greeting)) => {
                debug!(error = %err, "greeting used without generated reply");
                greeting
            }
            (Err(err), None) => return Err(err),
        };

        let now = self.clock.now();
        let mut c = session.lock();
        c.last_generation = Some(now);
        c.last_activity = now;
        let limit = c.dialogue.context_pairs();
        c.push_context(ContextEntry::non_player(turn.speaker, reply.clone()), limit);
        Ok(reply)
    }

    /// Close the session and produce a farewell line.
    ///
    /// Uses the configured farewell, else a generated one, else a static
    /// `"Farewell, <name>."`.
    pub async fn farewell(&self, session: &SessionHandle) -> String {
        let (configured, turn, enabled, listener) = {
            let mut c = session.lock();
            c.active = false;
            c.has_farewelled = true;
            let configured = c.dialogue.farewell().map(str::to_string);
            let speaker = c.non_player().map_or(Slot::A, |(slot, _)| slot);
            let listener = c.participant(speaker.other()).display_name.clone();
            (configured, turn_context(&c, speaker), c.dialogue.enabled, listener)
        };
        if let Some(line) = configured {
            return line;
        }
        let fallback = prompt::render_template(prompt::STATIC_FAREWELL, &[("other_name", &listener)]);
        let turn = match turn {
            Ok(turn) if enabled && !self.opted_out(turn.player) => turn,
            Ok(_) => return fallback,
            Err(err) => {
                debug!(error = %err, "farewell context unavailable");
                return fallback;
            }
        };
        let request = prompt::render_template(
            prompt::FAREWELL_PROMPT,
            &[("npc_name", &turn.speaker), ("other_name", &turn.listener)],
        );
        match self.gateway.generate(&request, &turn.context, turn.player).await {
            Ok(generation) => {
                let line = prompt::clean_reply(&generation.text, &turn.speaker);
                if line.is_empty() { fallback } else { line }
            }
            Err(err) => {
                debug!(error = %err, "farewell generation failed; using static line");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use parley_core::{DialogueConfig, ManualClock, Participant, ParticipantRef, SessionId};
    use parley_llm::{GatewayConfig, HttpRequest, ProviderKind, RawResponse, Transport, TransportError};

    use super::*;
    use crate::world::InMemoryWorld;

    struct Canned {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn post_json(&self, _request: HttpRequest) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(text) => Ok(RawResponse {
                    status: 200,
                    body: ollama_body(text),
                }),
                None => Err(TransportError::Connect("down".into())),
            }
        }
    }

    fn ollama_body(text: &str) -> String {
        format!(r#"{{"response":"{text}","done":true}}"#)
    }

    struct Fixture {
        machine: Machine,
        transport: Arc<Canned>,
        world: Arc<InMemoryWorld>,
        clock: Arc<ManualClock>,
    }

    fn fixture(reply: Option<&'static str>) -> Fixture {
        let transport = Arc::new(Canned { reply, calls: AtomicUsize::new(0) });
        let gateway = Arc::new(GenerationGateway::new(
            GatewayConfig {
                enabled: true,
                provider: Some(ProviderKind::Ollama),
                ..GatewayConfig::default()
            },
            transport.clone(),
        ));
        let world = Arc::new(InMemoryWorld::new());
        let clock = Arc::new(ManualClock::default());
        let machine = Machine::new(gateway, world.clone(), clock.clone(), chrono::Duration::seconds(2));
        Fixture { machine, transport, world, clock }
    }

    fn session(script: &[&[&str]], dialogue: DialogueConfig, now: DateTime<Utc>) -> SessionHandle {
        let script = script
            .iter()
            .map(|step| step.iter().filter_map(|l| ScriptedAction::parse(l)).collect())
            .collect();
        Arc::new(Mutex::new(Conversation::new(
            SessionId(1),
            Participant::new(ParticipantRef::mob(101), "merchant"),
            Participant::new(ParticipantRef::player(9), "alice"),
            script,
            dialogue,
            10,
            now,
            "",
        )))
    }

    #[test]
    fn advances_once_per_round() {
        let now = Utc::now();
        let handle = session(&[&["#1 say a"], &["#2 say b"]], DialogueConfig::default(), now);
        let mut c = handle.lock();
        assert!(matches!(begin_round(&mut c, 11, now), RoundPlan::Step(s) if s.len() == 1));
        assert_eq!(begin_round(&mut c, 11, now), RoundPlan::AlreadyProcessed);
        assert!(matches!(begin_round(&mut c, 12, now), RoundPlan::Step(_)));
        assert_eq!(begin_round(&mut c, 13, now), RoundPlan::Finished);
        assert!(!c.active);
        assert!(c.is_complete());
    }

    #[test]
    fn dynamic_sessions_time_out() {
        let now = Utc::now();
        let handle = session(&[], DialogueConfig { idle_timeout_secs: 60, ..DialogueConfig::default() }, now);
        let mut c = handle.lock();
        assert_eq!(begin_round(&mut c, 11, now), RoundPlan::AwaitingInput);
        assert_eq!(c.last_round_processed, Some(11));
        assert_eq!(begin_round(&mut c, 12, now + chrono::Duration::seconds(61)), RoundPlan::TimedOut);
        assert!(!c.active);
    }

    #[test]
    fn extracts_spoken_text() {
        assert_eq!(spoken_text("say Evening."), Some("Evening."));
        assert_eq!(spoken_text("sayto #2 Evening, friend."), Some("Evening, friend."));
        assert_eq!(spoken_text("sayto #2"), None);
        assert_eq!(spoken_text("emote waves"), None);
    }

    #[tokio::test]
    async fn generated_lines_become_sayto() {
        let f = fixture(Some("Quiet night."));
        let handle = session(&[&["#1 say Evening.", "#2 llm Answer the merchant."]], DialogueConfig::default(), f.clock.now());
        let step = match begin_round(&mut handle.lock(), 11, f.clock.now()) {
            RoundPlan::Step(step) => step,
            other => panic!("unexpected {other:?}"),
        };
        let resolved = f.machine.resolve_step(&handle, step).await;
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].to_string(), "#2 sayto #1 Quiet night.");
        let lines = handle.lock().context_lines();
        assert_eq!(lines, vec!["merchant: Evening.", "alice: Quiet night."]);
    }

    #[tokio::test]
    async fn failed_generation_drops_only_that_line() {
        let f = fixture(None);
        let handle = session(&[&["#1 emote waves", "#1 llm Greet.", "#2 say hi"]], DialogueConfig::default(), f.clock.now());
        let step = match begin_round(&mut handle.lock(), 11, f.clock.now()) {
            RoundPlan::Step(step) => step,
            other => panic!("unexpected {other:?}"),
        };
        let resolved = f.machine.resolve_step(&handle, step).await;
        let commands: Vec<_> = resolved.iter().map(|a| a.command.as_str()).collect();
        assert_eq!(commands, vec!["emote waves", "say hi"]);
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cooldown_drops_generated_lines_for_the_step() {
        let f = fixture(Some("Hm."));
        let handle = session(&[], DialogueConfig::default(), f.clock.now());
        handle.lock().last_generation = Some(f.clock.now());
        let step = vec![
            ScriptedAction::parse("#1 llm Greet.").expect("valid"),
            ScriptedAction::parse("#2 say hi").expect("valid"),
        ];
        let resolved = f.machine.resolve_step(&handle, step.clone()).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 0);

        f.clock.advance(chrono::Duration::seconds(2));
        assert_eq!(f.machine.resolve_step(&handle, step).await.len(), 2);
    }

    #[tokio::test]
    async fn opted_out_player_gets_no_generation() {
        let f = fixture(Some("Hm."));
        f.world.set_player_setting(9, "llm_disabled", Some("true"));
        let handle = session(&[&["#1 llm Greet."]], DialogueConfig::default(), f.clock.now());
        let step = vec![ScriptedAction::parse("#1 llm Greet.").expect("valid")];
        assert!(f.machine.resolve_step(&handle, step).await.is_empty());
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_reply_carries_greeting_and_cooldown_applies() {
        let f = fixture(Some("Fresh fish today."));
        let dialogue = DialogueConfig { greeting: "Well met!".into(), ..DialogueConfig::default() };
        let handle = session(&[], dialogue, f.clock.now());

        let first = f.machine.reply(&handle, "hello").await.expect("reply");
        assert_eq!(first, "Well met! Fresh fish today.");

        let err = f.machine.reply(&handle, "again").await.expect_err("cooling down");
        assert!(matches!(err, DialogueError::Cooldown { .. }));

        f.clock.advance(chrono::Duration::seconds(3));
        let second = f.machine.reply(&handle, "what fish?").await.expect("reply");
        assert_eq!(second, "Fresh fish today.");
        let c = handle.lock();
        assert!(c.has_greeted);
        assert_eq!(c.context_log.len(), 4);
    }

    #[tokio::test]
    async fn greeting_survives_backend_failure() {
        let f = fixture(None);
        let dialogue = DialogueConfig { greeting: "Well met!".into(), ..DialogueConfig::default() };
        let handle = session(&[], dialogue, f.clock.now());
        assert_eq!(f.machine.reply(&handle, "hello").await.expect("greeting"), "Well met!");
        f.clock.advance(chrono::Duration::seconds(3));
        // Backend is now in its backoff window.
        let err = f.machine.reply(&handle, "hello?").await.expect_err("no greeting left");
        assert!(matches!(err, DialogueError::Generation(_)));
    }

    #[tokio::test]
    async fn idle_session_refuses_input() {
        let f = fixture(Some("Hm."));
        let handle = session(&[], DialogueConfig { idle_timeout_secs: 10, ..DialogueConfig::default() }, f.clock.now());
        f.clock.advance(chrono::Duration::seconds(11));
        let err = f.machine.reply(&handle, "hello").await.expect_err("idle");
        assert_eq!(err, DialogueError::IdleTimeout(SessionId(1)));
        assert!(!handle.lock().active);
    }

    #[tokio::test]
    async fn farewell_prefers_config_then_generation_then_static() {
        let f = fixture(Some("Safe roads, alice."));
        let configured = session(&[], DialogueConfig { farewell: "Off you go.".into(), ..DialogueConfig::default() }, f.clock.now());
        assert_eq!(f.machine.farewell(&configured).await, "Off you go.");
        assert!(!configured.lock().active);

        let generated = session(&[], DialogueConfig::default(), f.clock.now());
        assert_eq!(f.machine.farewell(&generated).await, "Safe roads, alice.");

        let offline = fixture(None);
        let fallback = session(&[], DialogueConfig::default(), offline.clock.now());
        assert_eq!(offline.machine.farewell(&fallback).await, "Farewell, alice.");
    }
}
