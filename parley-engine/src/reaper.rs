//! Background tasks owned by the registry.
//!
//! - destroy workers: drain the bounded destroy queue
//! - memory sweeper: periodically drops expired memory records
//!
//! Both stop when the registry's cancellation token fires. Workers hold a
//! `Weak` registry so the pool never keeps the registry alive on its own.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parley_core::{Clock, MemoryStore, SessionId};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::ConversationRegistry;

/// Spawn `count` workers sharing one destroy queue.
pub fn spawn_destroy_workers(
    registry: &Arc<ConversationRegistry>,
    rx: mpsc::Receiver<SessionId>,
    count: usize,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker| {
            tokio::spawn(destroy_worker(
                worker,
                Arc::downgrade(registry),
                Arc::clone(&rx),
                cancel.clone(),
            ))
        })
        .collect()
}

async fn destroy_worker(
    worker: usize,
    registry: Weak<ConversationRegistry>,
    rx: Arc<Mutex<mpsc::Receiver<SessionId>>>,
    cancel: CancellationToken,
) {
    debug!(worker, "destroy worker started");
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                id = rx.recv() => id,
            }
        };
        let Some(id) = next else { break };
        let Some(registry) = registry.upgrade() else { break };
        registry.destroy_now(id);
    }

    // Shutdown destroys every session itself; leftovers only need draining.
    let mut rx = rx.lock().await;
    let mut drained = 0usize;
    while let Ok(id) = rx.try_recv() {
        if let Some(registry) = registry.upgrade() {
            registry.destroy_now(id);
        }
        drained += 1;
    }
    debug!(worker, drained, "destroy worker stopped");
}

/// Spawn the memory expiry sweeper.
pub fn spawn_memory_sweeper(
    memory: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = memory.sweep(clock.now());
                    if removed > 0 {
                        info!(removed, remaining = memory.len(), "memory sweep");
                    }
                }
            }
        }
        debug!("memory sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parley_core::{
        Conversation, ContextEntry, DialogueConfig, ManualClock, MemorySettings, Participant,
        ParticipantRef,
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_schedule_and_stops_on_cancel() {
        let memory = Arc::new(MemoryStore::new(&MemorySettings::default()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut convo = Conversation::new(
            SessionId(1),
            Participant::new(ParticipantRef::mob(1), "miller"),
            Participant::new(ParticipantRef::player(2), "alice"),
            Vec::new(),
            DialogueConfig::default(),
            0,
            clock.now(),
            "",
        );
        convo.push_context(ContextEntry::human("alice", "how is the mill"), 10);
        memory.capture(&convo, clock.now());

        let cancel = CancellationToken::new();
        let task = spawn_memory_sweeper(
            Arc::clone(&memory),
            clock.clone(),
            Duration::from_secs(3_600),
            cancel.clone(),
        );

        clock.advance(chrono::Duration::hours(25));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(memory.len(), 1, "no sweep before the first period");

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert!(memory.is_empty());

        cancel.cancel();
        task.await.expect("sweeper exits cleanly");
    }
}
