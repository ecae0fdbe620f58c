//! Conversation registry: owns every live session from creation to
//! destruction.
//!
//! Sessions are created by [`ConversationRegistry::attempt_conversation`],
//! advanced once per round by [`ConversationRegistry::next_actions`], and
//! torn down by [`ConversationRegistry::destroy`]. Destruction is queued to
//! a small worker pool (see [`crate::reaper`]); removal from the session
//! store is the single point of truth, so every session is destroyed (and
//! its memory captured) exactly once no matter how many paths ask for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use parley_core::config::DialogueSettings;
use parley_core::{
    Clock, Conversation, DefinitionFile, DefinitionLibrary, MemoryStore, Participant,
    ParticipantRef, ScriptedAction, SessionId,
};
use parley_llm::{GenerationGateway, TokenUsage, UsageLedger};
use rand::Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::DialogueError;
use crate::machine::{begin_round, Machine, RoundPlan};
use crate::reaper;
use crate::store::SessionStore;
use crate::world::World;

/// Per-player setting holding that player's generation usage as JSON.
pub const USAGE_SETTING_KEY: &str = "llm_usage";

/// Everything needed to try to start a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRequest {
    /// Template id of the initiating mob; selects the definition file.
    pub initiator_mob_id: u64,
    /// Who starts the conversation (`#1`).
    pub initiator: ParticipantRef,
    /// Name override for a player initiator. Mob names come from the world.
    pub initiator_name: String,
    /// Who is being talked to (`#2`).
    pub participant: ParticipantRef,
    /// Name override for a player participant.
    pub participant_name: String,
    /// Zone of the initiator; selects the definition folder.
    pub zone: String,
    /// Variant index to use regardless of rotation and allow-lists.
    pub force_variant: Option<usize>,
}

impl ConversationRequest {
    /// Mob-to-mob request with names taken from the world.
    #[must_use]
    pub fn between_mobs(initiator_mob_id: u64, initiator: u64, participant: u64, zone: &str) -> Self {
        Self {
            initiator_mob_id,
            initiator: ParticipantRef::mob(initiator),
            initiator_name: String::new(),
            participant: ParticipantRef::mob(participant),
            participant_name: String::new(),
            zone: zone.to_string(),
            force_variant: None,
        }
    }
}

/// One round's worth of actions for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundActions {
    /// Session the actions belong to.
    pub id: SessionId,
    /// Participant `#1`.
    pub a: ParticipantRef,
    /// Participant `#2`.
    pub b: ParticipantRef,
    /// Actions to dispatch, generated lines already resolved.
    pub actions: Vec<ScriptedAction>,
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Sessions ever created.
    pub created: u64,
    /// Sessions ever destroyed.
    pub destroyed: u64,
    /// Sessions currently live.
    pub active: usize,
}

/// The session registry.
pub struct ConversationRegistry {
    enabled: bool,
    settings: DialogueSettings,
    max_context_turns: usize,
    store: SessionStore,
    memory: Arc<MemoryStore>,
    usage: Arc<UsageLedger>,
    definitions: DefinitionLibrary,
    machine: Machine,
    world: Arc<dyn World>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    variant_usage: Mutex<HashMap<String, u64>>,
    destroy_tx: mpsc::Sender<SessionId>,
    cancel: CancellationToken,
    shutting_down: AtomicBool,
    drained: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    created: AtomicU64,
    destroyed: AtomicU64,
}

impl std::fmt::Debug for ConversationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationRegistry")
            .field("sessions", &self.store.len())
            .field("data_dir", &self.definitions.root())
            .field("shutting_down", &self.shutting_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ConversationRegistry {
    /// Build the registry and spawn its destroy workers and memory sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        config: &EngineConfig,
        world: Arc<dyn World>,
        gateway: Arc<GenerationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let mut settings = config.dialogue.clone();
        settings.validate();
        let (destroy_tx, destroy_rx) = mpsc::channel(settings.destroy_queue_capacity);
        let cancel = CancellationToken::new();
        let memory = Arc::new(MemoryStore::new(&config.memory));
        let max_context_turns = gateway.config().max_context_length.max(1);
        let usage = Arc::clone(gateway.usage());
        let machine = Machine::new(
            gateway,
            Arc::clone(&world),
            Arc::clone(&clock),
            config.generation_cooldown(),
        );

        let registry = Arc::new(Self {
            enabled: config.general.enabled,
            definitions: DefinitionLibrary::new(settings.data_dir.clone()),
            settings,
            max_context_turns,
            store: SessionStore::new(),
            memory: Arc::clone(&memory),
            usage,
            machine,
            world,
            clock: Arc::clone(&clock),
            next_id: AtomicU64::new(1),
            variant_usage: Mutex::new(HashMap::new()),
            destroy_tx,
            cancel: cancel.clone(),
            shutting_down: AtomicBool::new(false),
            drained: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        });

        let mut tasks = reaper::spawn_destroy_workers(
            &registry,
            destroy_rx,
            registry.settings.destroy_workers,
            cancel.clone(),
        );
        tasks.push(reaper::spawn_memory_sweeper(
            memory,
            clock,
            config.memory.sweep_interval(),
            cancel,
        ));
        *registry.tasks.lock() = tasks;

        info!(
            data_dir = %registry.definitions.root().display(),
            workers = registry.settings.destroy_workers,
            "conversation registry started"
        );
        registry
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Try to start a conversation. Returns the new session id, or `None`
    /// when the pair cannot talk.
    pub fn attempt_conversation(&self, request: ConversationRequest) -> Option<SessionId> {
        if !self.enabled || self.shutting_down.load(Ordering::Acquire) {
            return None;
        }
        if request.initiator.is_player() && request.participant.is_player() {
            debug!("conversation refused: both participants are players");
            return None;
        }
        let initiator = self.resolve(request.initiator, &request.initiator_name)?;
        let participant = self.resolve(request.participant, &request.participant_name)?;
        for user in [request.initiator, request.participant].iter().filter_map(ParticipantRef::player_id) {
            self.load_usage(user);
        }

        let file = match self.definitions.load(&request.zone, request.initiator_mob_id) {
            Ok(Some(file)) => file,
            Ok(None) => {
                debug!(zone = %request.zone, mob_id = request.initiator_mob_id, "no dialogue definition");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "dialogue definition unusable");
                return None;
            }
        };

        let relative = DefinitionLibrary::relative_path(&request.zone, request.initiator_mob_id);
        let index = self.pick_variant(
            &file,
            &relative,
            &initiator.display_name,
            &participant.display_name,
            request.force_variant,
        )?;
        let variant = file.variants.into_iter().nth(index)?;

        let mut dialogue = variant.dialogue.unwrap_or_default();
        dialogue.max_context_turns = dialogue.context_turns().min(self.max_context_turns);

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = self.clock.now();
        let mut conversation = Conversation::new(
            id,
            initiator,
            participant,
            variant.script,
            dialogue,
            self.world.current_round(),
            now,
            format!("{relative}:{index}"),
        );
        self.seed_memory(&mut conversation, now);

        let refs = [conversation.participant_a.reference, conversation.participant_b.reference];
        info!(
            session = %id,
            a = %conversation.participant_a.display_name,
            b = %conversation.participant_b.display_name,
            variant = %conversation.variant_tag,
            scripted = conversation.is_scripted(),
            "conversation started"
        );
        self.store.insert(conversation);
        for instance in refs.iter().filter_map(ParticipantRef::mob_instance) {
            self.world.set_mob_conversation(instance, Some(id));
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Some(id)
    }

    fn resolve(&self, reference: ParticipantRef, name: &str) -> Option<Participant> {
        match reference {
            ParticipantRef::Mob { instance_id } => {
                let Some(mob) = self.world.mob(instance_id) else {
                    debug!(%reference, "participant not found");
                    return None;
                };
                Some(Participant::new(reference, mob.name))
            }
            ParticipantRef::Player { user_id } => {
                let Some(player) = self.world.player(user_id) else {
                    debug!(%reference, "participant not found");
                    return None;
                };
                let name = if name.trim().is_empty() { player.name.as_str() } else { name.trim() };
                Some(Participant::new(reference, name.to_lowercase()))
            }
        }
    }

    fn pick_variant(
        &self,
        file: &DefinitionFile,
        relative: &str,
        initiator: &str,
        participant: &str,
        force: Option<usize>,
    ) -> Option<usize> {
        let tag = |i: usize| format!("{relative}:{i}");
        let mut usage = self.variant_usage.lock();

        let chosen = match force {
            Some(forced) if forced < file.variants.len() => forced,
            _ => {
                if let Some(forced) = force {
                    debug!(forced, available = file.variants.len(), "forced variant out of range");
                }
                let Some(chosen) = file
                    .supported_variants(initiator, participant)
                    .into_iter()
                    .min_by_key(|&i| (usage.get(&tag(i)).copied().unwrap_or(0), i))
                else {
                    debug!(%relative, %initiator, %participant, "no supported variant");
                    return None;
                };
                chosen
            }
        };
        *usage.entry(tag(chosen)).or_default() += 1;
        Some(chosen)
    }

    fn seed_memory(&self, conversation: &mut Conversation, now: chrono::DateTime<chrono::Utc>) {
        let Some((slot, npc)) = conversation.non_player() else {
            return;
        };
        let other = conversation.participant(slot.other());
        let Some(record) = self.memory.recall(&npc.display_name, &other.display_name, now) else {
            return;
        };
        debug!(npc = %record.npc, other = %record.other, "seeding conversation from memory");
        let limit = conversation.dialogue.context_pairs();
        for entry in record.seed_context(now) {
            conversation.push_context(entry, limit);
        }
    }

    // -----------------------------------------------------------------------
    // Lookup and maintenance
    // -----------------------------------------------------------------------

    /// Snapshot of a live session.
    ///
    /// Occasionally runs [`Self::run_maintenance`] as a side effect.
    #[must_use]
    pub fn conversation(&self, id: SessionId) -> Option<Conversation> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let chance = self.settings.maintenance_chance;
        if chance > 0.0 && rand::thread_rng().gen_bool(chance) {
            self.run_maintenance();
        }
        self.store.get(id).map(|handle| handle.lock().clone())
    }

    /// Schedule destruction of every session with a vanished participant or
    /// no progress for more than the stale-round threshold. Returns how many
    /// were scheduled.
    pub fn run_maintenance(&self) -> usize {
        let round = self.world.current_round();
        let threshold = self.settings.stale_round_threshold;
        let mut doomed = Vec::new();
        self.store.for_each(|id, c| {
            let stale = c.rounds_since_progress(round) > threshold;
            let vanished = !self.exists(c.participant_a.reference) || !self.exists(c.participant_b.reference);
            if stale || vanished {
                debug!(session = %id, stale, vanished, "maintenance reaping session");
                doomed.push(id);
            }
        });
        for id in &doomed {
            self.destroy(*id);
        }
        doomed.len()
    }

    fn exists(&self, reference: ParticipantRef) -> bool {
        match reference {
            ParticipantRef::Mob { instance_id } => self.world.mob(instance_id).is_some(),
            ParticipantRef::Player { user_id } => self.world.player(user_id).is_some(),
        }
    }

    /// Whether a session is over. Missing sessions count as complete.
    /// A complete session is scheduled for destruction.
    pub fn is_complete(&self, id: SessionId) -> bool {
        let Some(handle) = self.store.get(id) else {
            return true;
        };
        let complete = {
            let mut c = handle.lock();
            if c.script_finished() {
                c.active = false;
            }
            !c.active
        };
        if complete {
            self.destroy(id);
        }
        complete
    }

    // -----------------------------------------------------------------------
    // Turns
    // -----------------------------------------------------------------------

    /// Advance a session for the current round.
    ///
    /// Returns `None` if the session is gone or a participant no longer
    /// resolves. Returns empty actions when the session already advanced
    /// this round.
    pub async fn next_actions(&self, id: SessionId) -> Option<RoundActions> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let handle = self.store.get(id)?;
        let (a, b) = {
            let c = handle.lock();
            (c.participant_a.reference, c.participant_b.reference)
        };
        if !self.exists(a) || !self.exists(b) {
            warn!(session = %id, %a, %b, "participant vanished; ending conversation");
            self.destroy(id);
            return None;
        }

        let round = self.world.current_round();
        let plan = begin_round(&mut handle.lock(), round, self.clock.now());
        let actions = match plan {
            RoundPlan::Step(step) => self.machine.resolve_step(&handle, step).await,
            RoundPlan::TimedOut => {
                debug!(session = %id, "conversation idle; closing");
                Vec::new()
            }
            RoundPlan::AlreadyProcessed | RoundPlan::AwaitingInput | RoundPlan::Finished => Vec::new(),
        };
        Some(RoundActions { id, a, b, actions })
    }

    /// Answer a player's line in a dynamic session.
    ///
    /// # Errors
    /// See [`DialogueError`]. An idle session is scheduled for destruction.
    pub async fn process_player_input(&self, id: SessionId, input: &str) -> Result<String, DialogueError> {
        if self.cancel.is_cancelled() {
            return Err(DialogueError::NotFound(id));
        }
        let handle = self.store.get(id).ok_or(DialogueError::NotFound(id))?;
        let result = self.machine.reply(&handle, input).await;
        if matches!(result, Err(DialogueError::IdleTimeout(_))) {
            self.destroy(id);
        }
        result
    }

    /// Close a session and return its farewell line.
    ///
    /// # Errors
    /// [`DialogueError::NotFound`] if the session is gone.
    pub async fn end_conversation(&self, id: SessionId) -> Result<String, DialogueError> {
        let handle = self.store.get(id).ok_or(DialogueError::NotFound(id))?;
        let line = self.machine.farewell(&handle).await;
        debug!(session = %id, "conversation ended");
        Ok(line)
    }

    // -----------------------------------------------------------------------
    // Destruction
    // -----------------------------------------------------------------------

    /// Schedule a session for destruction. Never blocks; idempotent.
    ///
    /// Falls back to destroying in place when the queue is full or shutdown
    /// has begun.
    pub fn destroy(&self, id: SessionId) {
        if self.shutting_down.load(Ordering::Acquire) {
            self.destroy_now(id);
            return;
        }
        match self.destroy_tx.try_send(id) {
            Ok(()) => {}
            Err(TrySendError::Full(id)) => {
                debug!(session = %id, "destroy queue full; destroying inline");
                self.destroy_now(id);
            }
            Err(TrySendError::Closed(id)) => {
                self.destroy_now(id);
            }
        }
    }

    /// Destroy a session immediately. Returns whether this call did it.
    ///
    /// Unlinks the session, clears mob back-references that still point at
    /// it, saves player usage, then captures its memory.
    pub fn destroy_now(&self, id: SessionId) -> bool {
        let Some(handle) = self.store.remove(id) else {
            return false;
        };
        let snapshot = handle.lock().clone();
        for participant in [&snapshot.participant_a, &snapshot.participant_b] {
            match participant.reference {
                ParticipantRef::Mob { instance_id } => {
                    if self.world.mob(instance_id).and_then(|m| m.conversation) == Some(id) {
                        self.world.set_mob_conversation(instance_id, None);
                    }
                }
                ParticipantRef::Player { user_id } => self.save_usage(user_id),
            }
        }
        self.memory.capture(&snapshot, self.clock.now());
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        info!(session = %id, variant = %snapshot.variant_tag, "conversation destroyed");
        true
    }

    /// Seed the ledger from a player's saved usage unless it is already live.
    fn load_usage(&self, user: u64) {
        if self.usage.get(user).is_some() {
            return;
        }
        let Some(saved) = self.world.player_setting(user, USAGE_SETTING_KEY) else {
            return;
        };
        match serde_json::from_str::<TokenUsage>(&saved) {
            Ok(usage) => {
                debug!(user, calls = usage.total_calls, "restored generation usage");
                self.usage.restore(user, usage);
            }
            Err(err) => warn!(user, error = %err, "ignoring unreadable generation usage"),
        }
    }

    fn save_usage(&self, user: u64) {
        let Some(usage) = self.usage.get(user) else {
            return;
        };
        match serde_json::to_string(&usage) {
            Ok(json) => self.world.set_player_setting(user, USAGE_SETTING_KEY, Some(&json)),
            Err(err) => warn!(user, error = %err, "could not save generation usage"),
        }
    }

    /// Stop background work and destroy every session.
    ///
    /// Safe to call concurrently; every caller returns once the first has
    /// finished draining.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            self.drained.cancelled().await;
            return;
        }
        info!(sessions = self.store.len(), "conversation registry shutting down");
        self.cancel.cancel();
        for id in self.store.ids() {
            self.destroy_now(id);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task failed during shutdown");
            }
        }
        // Anything created while the first pass ran.
        for id in self.store.ids() {
            self.destroy_now(id);
        }
        self.drained.cancel();
        info!(destroyed = self.destroyed.load(Ordering::Relaxed), "conversation registry stopped");
    }

    /// Background tasks not yet joined.
    #[must_use]
    pub fn background_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Whether a definition file exists for `(zone, mob_id)`.
    #[must_use]
    pub fn has_definition(&self, mob_id: u64, zone: &str) -> bool {
        self.definitions.has_definition(zone, mob_id)
    }

    /// The definition library, e.g. to clear cached misses.
    #[must_use]
    pub fn definitions(&self) -> &DefinitionLibrary {
        &self.definitions
    }

    /// Cross-session memory.
    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            active: self.store.len(),
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Drop for ConversationRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
