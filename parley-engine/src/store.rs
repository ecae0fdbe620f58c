//! Session store: the registry's map of live conversations.
//!
//! Map membership is guarded by one `RwLock`; each conversation sits behind
//! its own `Mutex`, so advancing one session never blocks lookups of
//! another. Lock order is always map first, then session. Callers must not
//! hold a session guard while calling back into the store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use parley_core::{Conversation, SessionId};

/// Shared handle to one live conversation.
pub type SessionHandle = Arc<Mutex<Conversation>>;

/// Internally synchronized `SessionId -> Conversation` map.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to a live session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.read().get(&id).cloned()
    }

    /// Add a session. Returns its handle.
    pub fn insert(&self, conversation: Conversation) -> SessionHandle {
        let id = conversation.id;
        let handle = Arc::new(Mutex::new(conversation));
        self.sessions.write().insert(id, Arc::clone(&handle));
        handle
    }

    /// Unlink a session. Exactly one caller gets `Some` for a given id.
    pub fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.write().remove(&id)
    }

    /// Visit every session under the read lock.
    ///
    /// `f` must not touch the store.
    pub fn for_each(&self, mut f: impl FnMut(SessionId, &Conversation)) {
        let sessions = self.sessions.read();
        for (id, handle) in sessions.iter() {
            let conversation = handle.lock();
            f(*id, &conversation);
        }
    }

    /// Ids of every live session, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
