use std::sync::Arc;

use relay_core::{PeerId, SessionId};
use serde::Serialize;

use crate::client::PeerRegistry;
use crate::protocol::{Envelope, OutgoingFrame};
use crate::session::SessionRegistry;

/// Routes replies to whichever connection currently holds a session.
///
/// Delivery is fire-and-forget: the session may have gone away while a store
/// call was in flight, and that is not an error.
pub struct ResponseDispatcher {
    sessions: Arc<SessionRegistry>,
    peers: Arc<PeerRegistry>,
}

impl ResponseDispatcher {
    pub fn new(sessions: Arc<SessionRegistry>, peers: Arc<PeerRegistry>) -> Self {
        Self { sessions, peers }
    }

    /// Emit `event` with `{data: payload}` to the session's peer. Returns
    /// whether the frame was queued.
    pub fn send<T: Serialize>(&self, session_id: &SessionId, event: &str, payload: T) -> bool {
        let Some(session) = self.sessions.lookup(session_id) else {
            tracing::trace!(session_id = %session_id, event, "No session, dropping response");
            return false;
        };

        self.send_to_peer(session.peer(), event, payload)
    }

    /// Emit straight to a connection, bypassing session resolution. Used for
    /// frames that never named a session.
    pub fn send_to_peer<T: Serialize>(&self, peer: &PeerId, event: &str, payload: T) -> bool {
        let frame = OutgoingFrame {
            event,
            data: Envelope { data: payload },
        };
        match serde_json::to_string(&frame) {
            Ok(json) => self.peers.send_to(peer, json),
            Err(e) => {
                tracing::warn!(peer_id = %peer, event, error = %e, "Failed to encode response");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup() -> (ResponseDispatcher, Arc<SessionRegistry>, Arc<PeerRegistry>) {
        let sessions = Arc::new(SessionRegistry::new());
        let peers = Arc::new(PeerRegistry::new(32, Duration::from_secs(90)));
        let dispatcher = ResponseDispatcher::new(Arc::clone(&sessions), Arc::clone(&peers));
        (dispatcher, sessions, peers)
    }

    #[test]
    fn delivers_wrapped_payload() {
        let (dispatcher, sessions, peers) = setup();
        let (peer, mut rx) = peers.register();
        sessions.register(SessionId::from_raw("alice"), peer);

        assert!(dispatcher.send(
            &SessionId::from_raw("alice"),
            "sendWriteBuffer",
            serde_json::json!({"BufferData": "abc"})
        ));

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "sendWriteBuffer");
        assert_eq!(frame["data"]["data"]["BufferData"], "abc");
    }

    #[test]
    fn routes_to_current_peer_not_requester() {
        let (dispatcher, sessions, peers) = setup();
        let (old, mut old_rx) = peers.register();
        let (new, mut new_rx) = peers.register();
        sessions.register(SessionId::from_raw("alice"), old);
        sessions.register(SessionId::from_raw("alice"), new);

        dispatcher.send(&SessionId::from_raw("alice"), "serverMessage", "hi");
        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());
    }

    #[test]
    fn unknown_session_is_silently_dropped() {
        let (dispatcher, _sessions, _peers) = setup();
        assert!(!dispatcher.send(&SessionId::from_raw("ghost"), "serverMessage", "hi"));
    }

    #[test]
    fn send_to_peer_skips_session_lookup() {
        let (dispatcher, _sessions, peers) = setup();
        let (peer, mut rx) = peers.register();

        assert!(dispatcher.send_to_peer(&peer, "serverMessage", serde_json::json!({"Error": "bad"})));
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["data"]["data"]["Error"], "bad");
    }

    #[test]
    fn vanished_peer_is_silently_dropped() {
        let (dispatcher, sessions, peers) = setup();
        let (peer, _rx) = peers.register();
        sessions.register(SessionId::from_raw("alice"), peer.clone());
        peers.unregister(&peer);

        assert!(!dispatcher.send(&SessionId::from_raw("alice"), "serverMessage", "hi"));
    }
}
