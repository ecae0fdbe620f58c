//! Integration Tests: conversations driven end to end through the
//! registry and the idle-tick adapter, against an in-memory world and a
//! canned generation backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::{DefinitionFile, ManualClock, ParticipantRef, SessionId};
use parley_engine::{
    ConversationRegistry, ConversationRequest, EngineConfig, IdleTickAdapter, InMemoryWorld, World,
    WorldEvent, USAGE_SETTING_KEY,
};
use parley_llm::{
    GatewayConfig, GenerationGateway, HttpRequest, ProviderKind, RawResponse, TokenUsage, Transport,
    TransportError,
};
use tempfile::TempDir;

const MERCHANT: &str = r##"
- Supported:
    merchant: ["guard", "*"]
  Conversation:
    - ["#1 emote waves at #2 ", "#2 say Evening."]
    - ["#1 llm Ask the guard about the night watch."]
    - ["#2 sayto #1 All quiet."]
  LLMConfig:
    SystemPrompt: "You are a merchant in a busy square."
    Greeting: "Well met!"
    Farewell: "Safe travels."
"##;

const WATCH_REPLY: &str = "Has the night watch seen anything?";

/// Answers every request with the same Ollama reply.
struct CannedBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for CannedBackend {
    async fn post_json(&self, _request: HttpRequest) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawResponse {
            status: 200,
            body: format!(r#"{{"response":"{WATCH_REPLY}","done":true,"prompt_eval_count":40,"eval_count":8}}"#),
        })
    }
}

struct TownSquare {
    _data: TempDir,
    world: Arc<InMemoryWorld>,
    backend: Arc<CannedBackend>,
    registry: Arc<ConversationRegistry>,
}

fn town_square() -> TownSquare {
    let data = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(data.path().join("town_square")).expect("mkdir");
    std::fs::write(data.path().join("town_square/7.yaml"), MERCHANT).expect("write definition");

    let mut config = EngineConfig::default();
    config.dialogue.data_dir = data.path().to_path_buf();
    config.dialogue.maintenance_chance = 0.0;
    config.llm = GatewayConfig {
        enabled: true,
        provider: Some(ProviderKind::Ollama),
        ..GatewayConfig::default()
    };

    let world = Arc::new(InMemoryWorld::new());
    world.spawn_mob(101, 7, "merchant", "town square", 1);
    world.spawn_mob(205, 12, "guard", "town square", 1);
    world.spawn_mob(206, 13, "baker", "town square", 1);
    world.spawn_mob(207, 14, "smith", "town square", 1);
    world.connect_player(9, "Alice", 1);
    world.connect_player(10, "Bob", 1);

    let backend = Arc::new(CannedBackend { calls: AtomicUsize::new(0) });
    let gateway = Arc::new(GenerationGateway::new(config.llm.clone(), backend.clone()));
    let registry = ConversationRegistry::start(
        &config,
        world.clone(),
        gateway,
        Arc::new(ManualClock::default()),
    );
    TownSquare { _data: data, world, backend, registry }
}

fn merchant_and(instance: u64) -> ConversationRequest {
    ConversationRequest::between_mobs(7, 101, instance, "town square")
}

async fn wait_until_gone(registry: &ConversationRegistry, id: SessionId) -> bool {
    for _ in 0..100 {
        if registry.conversation(id).is_none() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Session creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merchant_greets_guard_with_the_supported_variant() {
    let square = town_square();
    let id = square.registry.attempt_conversation(merchant_and(205)).expect("supported pairing");

    let conversation = square.registry.conversation(id).expect("live");
    let file = DefinitionFile::parse(MERCHANT, std::path::Path::new("town_square/7.yaml")).expect("valid");
    assert_eq!(conversation.action_script, file.variants[0].script);
    assert_eq!(conversation.dialogue.system_prompt, "You are a merchant in a busy square.");
    assert_eq!(conversation.dialogue.greeting(), Some("Well met!"));
    assert_eq!(conversation.participant_b.display_name, "guard");
    assert_eq!(conversation.variant_tag, "town_square/7.yaml:0");
    assert_eq!(square.world.mob(205).and_then(|m| m.conversation), Some(id));

    square.registry.shutdown().await;
}

#[tokio::test]
async fn two_players_cannot_converse() {
    let square = town_square();
    let request = ConversationRequest {
        initiator: ParticipantRef::player(9),
        participant: ParticipantRef::player(10),
        ..merchant_and(205)
    };
    assert!(square.registry.attempt_conversation(request).is_none());
    assert!(square.registry.is_empty());
    square.registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Round advancement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_advance_per_round() {
    let square = town_square();
    let id = square.registry.attempt_conversation(merchant_and(205)).expect("starts");
    square.world.set_round(1);

    let first = square.registry.next_actions(id).await.expect("live");
    assert_eq!(first.actions.len(), 2);
    assert_eq!((first.a, first.b), (ParticipantRef::mob(101), ParticipantRef::mob(205)));

    let again = square.registry.next_actions(id).await.expect("still live");
    assert!(again.actions.is_empty());
    assert_eq!(square.registry.conversation(id).map(|c| c.position), Some(1));

    square.registry.shutdown().await;
}

#[tokio::test]
async fn finished_script_is_complete_then_unreachable() {
    let square = town_square();
    let id = square.registry.attempt_conversation(merchant_and(205)).expect("starts");

    for round in 1..=3 {
        square.world.set_round(round);
        let step = square.registry.next_actions(id).await.expect("live");
        assert!(!step.actions.is_empty());
    }
    assert!(square.registry.is_complete(id));
    assert!(wait_until_gone(&square.registry, id).await);
    assert!(square.registry.is_complete(id));
    assert_eq!(square.world.mob(101).and_then(|m| m.conversation), None);

    square.registry.shutdown().await;
}

#[tokio::test]
async fn vanished_participant_ends_the_session() {
    let square = town_square();
    let id = square.registry.attempt_conversation(merchant_and(205)).expect("starts");
    square.world.despawn_mob(205);
    square.world.set_round(1);
    assert!(square.registry.next_actions(id).await.is_none());
    assert!(wait_until_gone(&square.registry, id).await);
    square.registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Idle-tick adapter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tick_adapter_plays_the_script_to_the_end() {
    let square = town_square();
    let adapter = IdleTickAdapter::new(square.registry.clone(), square.world.clone());
    let id = square.registry.attempt_conversation(merchant_and(205)).expect("starts");

    square.world.next_round();
    let report = adapter.on_new_round().await;
    assert_eq!(report.sessions, 1);
    assert_eq!(report.actions_dispatched, 2);
    assert_eq!(
        square.world.drain_events(),
        vec![
            WorldEvent::MobCommand { instance: 101, command: "emote waves at guard#205".into(), delay_rounds: 0 },
            WorldEvent::MobCommand { instance: 205, command: "say Evening.".into(), delay_rounds: 1 },
        ]
    );

    // Same round again: nothing new.
    assert_eq!(adapter.on_new_round().await.actions_dispatched, 0);

    square.world.next_round();
    adapter.on_new_round().await;
    assert_eq!(
        square.world.drain_events(),
        vec![WorldEvent::MobCommand {
            instance: 101,
            command: format!("sayto guard {WATCH_REPLY}"),
            delay_rounds: 0,
        }]
    );
    assert_eq!(square.backend.calls.load(Ordering::SeqCst), 1);

    square.world.next_round();
    let last = adapter.on_new_round().await;
    assert_eq!(last.ended, 1);
    assert_eq!(
        square.world.drain_events(),
        vec![WorldEvent::MobCommand { instance: 205, command: "sayto merchant All quiet.".into(), delay_rounds: 1 }]
    );
    assert!(square.world.mobs_in_conversation().is_empty());
    assert!(wait_until_gone(&square.registry, id).await);

    let record = square.registry.memory().recall("merchant", "guard", chrono::Utc::now());
    assert_eq!(record.map(|r| r.interaction_count), Some(1));
    square.registry.shutdown().await;
}

#[tokio::test]
async fn walking_away_ends_with_a_farewell() {
    let square = town_square();
    let adapter = IdleTickAdapter::new(square.registry.clone(), square.world.clone());
    let id = square.registry.attempt_conversation(merchant_and(205)).expect("starts");

    square.world.move_mob(205, 2);
    square.world.next_round();
    let report = adapter.on_new_round().await;
    assert_eq!(report.ended, 1);
    assert_eq!(
        square.world.drain_events(),
        vec![WorldEvent::RoomMessage { room: 1, text: "merchant says, \"Safe travels.\"".into() }]
    );
    assert!(square.world.mobs_in_conversation().is_empty());
    assert!(wait_until_gone(&square.registry, id).await);
    square.registry.shutdown().await;
}

#[tokio::test]
async fn stale_back_reference_is_cleared() {
    let square = town_square();
    let adapter = IdleTickAdapter::new(square.registry.clone(), square.world.clone());
    square.world.set_mob_conversation(206, Some(SessionId(99)));
    let report = adapter.on_new_round().await;
    assert_eq!(report.cleared_refs, 1);
    assert_eq!(report.sessions, 0);
    assert!(square.world.mobs_in_conversation().is_empty());
    square.registry.shutdown().await;
}

#[tokio::test]
async fn player_conversation_unblocks_input_on_completion() {
    let square = town_square();
    let adapter = IdleTickAdapter::new(square.registry.clone(), square.world.clone());
    let request = ConversationRequest {
        participant: ParticipantRef::player(9),
        ..merchant_and(205)
    };
    square.registry.attempt_conversation(request).expect("starts");

    for _ in 0..3 {
        square.world.next_round();
        adapter.on_new_round().await;
    }
    let events = square.world.drain_events();
    assert!(events.contains(&WorldEvent::PlayerCommand { user: 9, command: "say Evening.".into() }));
    assert!(events.contains(&WorldEvent::PlayerCommand { user: 9, command: "sayto merchant All quiet.".into() }));
    assert!(events.contains(&WorldEvent::Unblocked(9)));
    square.registry.shutdown().await;
}

#[tokio::test]
async fn generation_usage_is_carried_in_player_settings() {
    let square = town_square();
    let saved = TokenUsage { total_calls: 2, input_tokens: 100, output_tokens: 20, ..TokenUsage::default() };
    square.world.set_player_setting(9, USAGE_SETTING_KEY, Some(&serde_json::to_string(&saved).expect("json")));

    let request = ConversationRequest {
        participant: ParticipantRef::player(9),
        ..merchant_and(205)
    };
    let id = square.registry.attempt_conversation(request).expect("starts");
    for round in 1..=3 {
        square.world.set_round(round);
        square.registry.next_actions(id).await.expect("live");
    }
    assert_eq!(square.backend.calls.load(Ordering::SeqCst), 1);

    square.registry.shutdown().await;
    let stored = square.world.player_setting(9, USAGE_SETTING_KEY).expect("usage saved");
    let usage: TokenUsage = serde_json::from_str(&stored).expect("valid usage json");
    assert_eq!(usage.total_calls, 3);
    assert_eq!(usage.input_tokens, 140);
    assert_eq!(usage.output_tokens, 28);
    assert!(usage.last_used.is_some());
}

// ---------------------------------------------------------------------------
// converse command
// ---------------------------------------------------------------------------

#[tokio::test]
async fn converse_pairs_with_the_first_idle_mob() {
    let square = town_square();
    square.world.set_mob_hidden(205, true);
    let world: &dyn World = square.world.as_ref();

    let id = parley_engine::commands::converse(&square.registry, world, 101, None).expect("finds baker");
    let conversation = square.registry.conversation(id).expect("live");
    assert_eq!(conversation.participant_b.display_name, "baker");

    // Busy now.
    assert!(parley_engine::commands::converse(&square.registry, world, 101, None).is_none());
    // The smith has no definition of its own.
    assert!(parley_engine::commands::converse(&square.registry, world, 207, None).is_none());
    square.registry.shutdown().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_shutdown_destroys_each_session_once() {
    let square = town_square();
    for other in [205, 206, 207] {
        square.registry.attempt_conversation(merchant_and(other)).expect("starts");
    }
    assert_eq!(square.registry.len(), 3);

    let first = Arc::clone(&square.registry);
    let second = Arc::clone(&square.registry);
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.shutdown().await }),
        tokio::spawn(async move { second.shutdown().await }),
    );
    a.expect("first shutdown");
    b.expect("second shutdown");

    let stats = square.registry.stats();
    assert_eq!(stats.created, 3);
    assert_eq!(stats.destroyed, 3);
    assert!(square.registry.is_empty());
    assert_eq!(square.registry.background_tasks(), 0);
    assert_eq!(square.registry.memory().len(), 3);
    for other in ["guard", "baker", "smith"] {
        let record = square.registry.memory().recall("merchant", other, chrono::Utc::now()).expect("captured");
        assert_eq!(record.interaction_count, 1);
    }
    assert!(square.world.mobs_in_conversation().is_empty());

    // Once shut down, nothing new starts and lookups fail fast.
    assert!(square.registry.attempt_conversation(merchant_and(205)).is_none());
    assert!(square.registry.next_actions(SessionId(1)).await.is_none());
    square.registry.shutdown().await;
}
