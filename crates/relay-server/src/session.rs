//! Logical client sessions.
//!
//! A session is keyed by the id the client picked in `newClient` (or its peer
//! id when it picked none) and remembers which transport connection to answer
//! on. Re-registering an id replaces the session and its buffer outright.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use relay_core::{PeerId, SessionId};

use crate::buffer::WriteBuffer;

pub struct Session {
    id: SessionId,
    peer: PeerId,
    buffer: Mutex<WriteBuffer>,
}

impl Session {
    fn new(id: SessionId, peer: PeerId) -> Self {
        Self {
            id,
            peer,
            buffer: Mutex::new(WriteBuffer::new()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Lock this session's write buffer. Never hold the guard across an await.
    pub fn buffer(&self) -> MutexGuard<'_, WriteBuffer> {
        self.buffer.lock()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the session for `id` with a fresh, empty buffer.
    pub fn register(&self, id: SessionId, peer: PeerId) -> Arc<Session> {
        let session = Arc::new(Session::new(id.clone(), peer));
        if let Some(previous) = self.sessions.insert(id, Arc::clone(&session)) {
            tracing::debug!(
                session_id = %previous.id,
                old_peer = %previous.peer,
                new_peer = %session.peer,
                "Session replaced"
            );
        }
        session
    }

    /// Resolve `id` as a session id first, then as the peer id of some session.
    ///
    /// A connection may hold several sessions. The peer-id fallback then
    /// picks the one with the smallest session id, so repeated lookups agree.
    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        if let Some(session) = self.sessions.get(id) {
            return Some(Arc::clone(session.value()));
        }
        self.sessions
            .iter()
            .filter(|entry| entry.value().peer == *id.as_str())
            .min_by(|a, b| a.key().as_str().cmp(b.key().as_str()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the session `id` resolves to, using the same two-step lookup.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let key = self.lookup(id)?.id.clone();
        self.sessions.remove(&key).map(|(_, session)| session)
    }

    /// Drop every session still bound to `peer`. Sessions that have since been
    /// re-registered from another connection are left alone.
    pub fn disconnect(&self, peer: &PeerId) -> Vec<SessionId> {
        let bound: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().peer == *peer)
            .map(|entry| entry.key().clone())
            .collect();

        bound
            .into_iter()
            .filter(|id| {
                self.sessions
                    .remove_if(id, |_, session| session.peer == *peer)
                    .is_some()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from_raw(s)
    }

    #[test]
    fn register_and_lookup() {
        let registry = SessionRegistry::new();
        let peer = PeerId::new();
        registry.register(sid("alice"), peer.clone());

        let session = registry.lookup(&sid("alice")).unwrap();
        assert_eq!(session.peer(), &peer);
        assert!(registry.lookup(&sid("bob")).is_none());
    }

    #[test]
    fn reregistration_replaces_buffer() {
        let registry = SessionRegistry::new();
        let first = registry.register(sid("alice"), PeerId::new());
        first.buffer().append("k", "old");

        let second_peer = PeerId::new();
        registry.register(sid("alice"), second_peer.clone());

        let current = registry.lookup(&sid("alice")).unwrap();
        assert_eq!(current.peer(), &second_peer);
        assert!(current.buffer().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_falls_back_to_peer_id() {
        let registry = SessionRegistry::new();
        let peer = PeerId::new();
        registry.register(sid("alice"), peer.clone());

        let by_peer = registry.lookup(&SessionId::from(&peer)).unwrap();
        assert_eq!(by_peer.id(), &sid("alice"));
    }

    #[test]
    fn peer_id_fallback_prefers_smallest_session_id() {
        let registry = SessionRegistry::new();
        let peer = PeerId::new();
        for name in ["mallory", "carol", "dave", "bob", "erin"] {
            registry.register(sid(name), peer.clone());
        }

        for _ in 0..8 {
            let hit = registry.lookup(&SessionId::from(&peer)).unwrap();
            assert_eq!(hit.id(), &sid("bob"));
        }

        registry.remove(&SessionId::from(&peer)).unwrap();
        let next = registry.lookup(&SessionId::from(&peer)).unwrap();
        assert_eq!(next.id(), &sid("carol"));
    }

    #[test]
    fn remove_resolves_through_peer_id() {
        let registry = SessionRegistry::new();
        let peer = PeerId::new();
        registry.register(sid("alice"), peer.clone());

        let removed = registry.remove(&SessionId::from(&peer)).unwrap();
        assert_eq!(removed.id(), &sid("alice"));
        assert!(registry.is_empty());
        assert!(registry.remove(&sid("alice")).is_none());
    }

    #[test]
    fn disconnect_drops_only_bound_sessions() {
        let registry = SessionRegistry::new();
        let a = PeerId::new();
        let b = PeerId::new();
        registry.register(sid("one"), a.clone());
        registry.register(sid("two"), a.clone());
        registry.register(sid("three"), b.clone());

        let mut removed = registry.disconnect(&a);
        removed.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(removed, vec![sid("one"), sid("two")]);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&sid("three")).is_some());
    }

    #[test]
    fn disconnect_spares_sessions_moved_to_new_peer() {
        let registry = SessionRegistry::new();
        let old = PeerId::new();
        let new = PeerId::new();
        registry.register(sid("alice"), old.clone());
        registry.register(sid("alice"), new.clone());

        assert!(registry.disconnect(&old).is_empty());
        assert_eq!(registry.lookup(&sid("alice")).unwrap().peer(), &new);
    }

    #[test]
    fn buffers_are_isolated_between_sessions() {
        let registry = SessionRegistry::new();
        let a = registry.register(sid("a"), PeerId::new());
        let b = registry.register(sid("b"), PeerId::new());

        a.buffer().append("savesslot", "secret");
        assert!(b.buffer().peek("savesslot").is_err());
    }
}
