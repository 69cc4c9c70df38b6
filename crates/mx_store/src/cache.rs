//! In-memory Olm session cache.
//!
//! Holds the unpickled sessions handed out by the store so a burst of
//! decryptions does not unpickle the same row over and over. The database is
//! always written first; the cache may lag or diverge and is never read in
//! place of a write.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use mx_crypto::Session;
use mx_proto::{IdentityKey, SessionId};

/// A session shared between the cache and the engine. The engine mutates it
/// in place and then asks the store to persist it.
///
/// The store locks the session itself while pickling it, and
/// `parking_lot::Mutex` is not reentrant: drop any guard from `lock()` before
/// calling [`CryptoStore::update_session`](crate::CryptoStore::update_session)
/// or the call deadlocks.
pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Default)]
pub struct OlmCache {
    sessions: Mutex<HashMap<IdentityKey, HashMap<SessionId, SharedSession>>>,
}

impl OlmCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_any(&self, key: &IdentityKey) -> bool {
        self.sessions.lock().get(key).is_some_and(|by_id| !by_id.is_empty())
    }

    pub fn contains(&self, key: &IdentityKey, session_id: &SessionId) -> bool {
        self.sessions.lock().get(key).is_some_and(|by_id| by_id.contains_key(session_id))
    }

    pub fn get(&self, key: &IdentityKey, session_id: &SessionId) -> Option<SharedSession> {
        self.sessions.lock().get(key)?.get(session_id).cloned()
    }

    /// Insert or replace, returning the previous entry.
    pub fn insert(&self, key: &IdentityKey, session: SharedSession) -> Option<SharedSession> {
        let session_id = session.lock().id().clone();
        self.sessions.lock().entry(key.clone()).or_default().insert(session_id, session)
    }

    /// Insert unless an entry already exists; returns whichever entry is cached
    /// afterwards.
    pub fn get_or_insert(&self, key: &IdentityKey, session: SharedSession) -> SharedSession {
        let session_id = session.lock().id().clone();
        self.sessions
            .lock()
            .entry(key.clone())
            .or_default()
            .entry(session_id)
            .or_insert(session)
            .clone()
    }

    pub fn clear(&self) {
        self.sessions.lock().clear();
    }
}
