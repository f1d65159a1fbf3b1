//! Session Registry (C2): the directory of live sessions and the single
//! source of truth for invariants I1–I3.
//!
//! The spec allows either one global lock or a per-session lock plus one
//! lock for the top-level indexes; we take the latter, tighter option:
//! `RegistryInner` holds only `sessionsById` and `sessionIdByInviteKey`
//! behind one [`parking_lot::Mutex`], so invite-key rotation (I1) is
//! atomic without blocking unrelated session-local mutations, which live
//! behind each [`Session`]'s own lock. Fixed lock order is registry → session;
//! this module never acquires a session lock while holding its own.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{HubError, HubResult};
use crate::model::{Session, SessionId};

const INVITE_KEY_LEN: usize = 12;
const INVITE_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

struct RegistryInner {
    sessions_by_id: HashMap<SessionId, Arc<Session>>,
    session_id_by_invite_key: HashMap<String, SessionId>,
}

/// The process-wide session directory.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sessions_by_id: HashMap::new(),
                session_id_by_invite_key: HashMap::new(),
            }),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.lock().sessions_by_id.get(session_id).cloned()
    }

    pub fn get_by_invite_key(&self, invite_key: &str) -> Option<Arc<Session>> {
        let inner = self.inner.lock();
        let session_id = inner.session_id_by_invite_key.get(invite_key)?;
        inner.sessions_by_id.get(session_id).cloned()
    }

    /// Insert a new session under a freshly generated, collision-free
    /// invite key. Returns the key.
    pub fn insert(&self, session: Arc<Session>) -> String {
        let mut inner = self.inner.lock();
        let key = loop {
            let candidate = generate_invite_key();
            if !inner.session_id_by_invite_key.contains_key(&candidate) {
                break candidate;
            }
        };
        inner
            .session_id_by_invite_key
            .insert(key.clone(), session.id.clone());
        inner.sessions_by_id.insert(session.id.clone(), session);
        key
    }

    /// Atomically replace a session's invite key, unregistering the old one.
    /// Returns the new key, or `NotFound` if the session does not exist.
    pub fn rotate_invite_key(&self, session_id: &str) -> HubResult<String> {
        let mut inner = self.inner.lock();
        if !inner.sessions_by_id.contains_key(session_id) {
            return Err(HubError::NotFound(session_id.to_owned()));
        }

        inner
            .session_id_by_invite_key
            .retain(|_, sid| sid != session_id);

        let new_key = loop {
            let candidate = generate_invite_key();
            if !inner.session_id_by_invite_key.contains_key(&candidate) {
                break candidate;
            }
        };
        inner
            .session_id_by_invite_key
            .insert(new_key.clone(), session_id.to_owned());
        Ok(new_key)
    }

    /// Remove a session and its invite key. Idempotent: removing an
    /// already-absent session is not an error.
    pub fn remove(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        inner.sessions_by_id.remove(session_id);
        inner
            .session_id_by_invite_key
            .retain(|_, sid| sid != session_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_session_ids(&self) -> Vec<SessionId> {
        self.inner.lock().sessions_by_id.keys().cloned().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a non-guessable session id (well over 72 bits of entropy: a v4
/// UUID without dashes carries 122).
pub fn generate_session_id() -> SessionId {
    uuid::Uuid::new_v4().simple().to_string()
}

fn generate_invite_key() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_KEY_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..INVITE_KEY_ALPHABET.len());
            INVITE_KEY_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionSettings;

    fn make_session(id: &str, creator: &str) -> Arc<Session> {
        Arc::new(Session::new(
            id.to_owned(),
            "demo".to_owned(),
            creator.to_owned(),
            SessionSettings::new(10, false, 1_000_000, 500),
        ))
    }

    #[test]
    fn invite_key_resolves_to_inserted_session() {
        let registry = SessionRegistry::new();
        let session = make_session("s1", "alice");
        let key = registry.insert(session.clone());

        let resolved = registry.get_by_invite_key(&key).unwrap();
        assert_eq!(resolved.id, "s1");
        assert_eq!(key.len(), INVITE_KEY_LEN);
    }

    #[test]
    fn rotation_invalidates_old_key_atomically() {
        let registry = SessionRegistry::new();
        let session = make_session("s1", "alice");
        let old_key = registry.insert(session);

        let new_key = registry.rotate_invite_key("s1").unwrap();
        assert_ne!(old_key, new_key);
        assert!(registry.get_by_invite_key(&old_key).is_none());
        assert!(registry.get_by_invite_key(&new_key).is_some());
    }

    #[test]
    fn rotate_missing_session_errors() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.rotate_invite_key("nope"),
            Err(HubError::NotFound(_))
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = make_session("s1", "alice");
        registry.insert(session);
        registry.remove("s1");
        registry.remove("s1");
        assert!(registry.is_empty());
    }
}
