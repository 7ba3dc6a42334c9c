use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use relay_core::PeerId;
use tokio::sync::mpsc;

/// Something a transport connection hands to the command processor.
#[derive(Debug)]
pub enum Inbound {
    Frame { peer: PeerId, text: String },
    Disconnected { peer: PeerId },
}

/// A connected WebSocket peer.
pub struct Peer {
    pub id: PeerId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Peer {
    fn new(id: PeerId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all live transport connections.
pub struct PeerRegistry {
    peers: DashMap<PeerId, Arc<Peer>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl PeerRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            peers: DashMap::new(),
            max_send_queue,
            client_timeout,
        }
    }

    /// Register a new peer and return its ID + outgoing queue receiver.
    pub fn register(&self) -> (PeerId, mpsc::Receiver<String>) {
        let id = PeerId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue.max(1));
        self.peers.insert(id.clone(), Arc::new(Peer::new(id.clone(), tx)));
        (id, rx)
    }

    /// Remove a peer by ID. Returns whether it was registered.
    pub fn unregister(&self, id: &PeerId) -> bool {
        match self.peers.remove(id) {
            Some((_, peer)) => {
                peer.connected.store(false, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|p| Arc::clone(p.value()))
    }

    /// Queue a frame for one peer. Drops it if the queue is full or the peer is gone.
    pub fn send_to(&self, id: &PeerId, message: String) -> bool {
        let Some(peer) = self.get(id) else {
            return false;
        };
        if !peer.is_connected() {
            return false;
        }
        match peer.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    peer_id = %id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of connected peers.
    pub fn count(&self) -> usize {
        self.peers.len()
    }

    /// Remove peers that haven't answered a ping within the timeout.
    pub fn cleanup_dead_peers(&self) -> Vec<PeerId> {
        let dead: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| !entry.value().is_alive(self.client_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(peer_id = %id, "Cleaned up dead peer");
        }
        dead
    }
}

/// Drive one WebSocket: a writer task drains the peer's queue and pings,
/// a reader task forwards text frames to the processor.
pub async fn handle_ws_connection(
    socket: WebSocket,
    peer_id: PeerId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<PeerRegistry>,
    inbound: mpsc::Sender<Inbound>,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_pid = peer_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(peer_id = %writer_pid, "Sent ping");
                }
            }
        }
    });

    let reader_pid = peer_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader_inbound = inbound.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let frame = Inbound::Frame {
                        peer: reader_pid.clone(),
                        text: text.to_string(),
                    };
                    if reader_inbound.send(frame).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(peer) = reader_registry.get(&reader_pid) {
                        peer.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    let writer_abort = writer.abort_handle();
    let reader_abort = reader.abort_handle();
    tokio::select! {
        _ = writer => reader_abort.abort(),
        _ = reader => writer_abort.abort(),
    }

    registry.unregister(&peer_id);
    let _ = inbound.send(Inbound::Disconnected { peer: peer_id.clone() }).await;
    tracing::info!(peer_id = %peer_id, "WebSocket peer disconnected");
}

/// Periodically reap peers that stopped answering pings and report them as
/// disconnected.
pub fn start_cleanup_task(
    registry: Arc<PeerRegistry>,
    inbound: mpsc::Sender<Inbound>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_peers();
            if !removed.is_empty() {
                tracing::info!(removed = removed.len(), "Dead peer cleanup");
            }
            for peer in removed {
                if inbound.send(Inbound::Disconnected { peer }).await.is_err() {
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(queue: usize) -> PeerRegistry {
        PeerRegistry::new(queue, Duration::from_secs(90))
    }

    #[test]
    fn register_and_unregister() {
        let registry = registry(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);

        assert!(registry.unregister(&id1));
        assert!(!registry.unregister(&id1));
        assert_eq!(registry.count(), 1);

        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn send_to_specific_peer() {
        let registry = registry(32);
        let (id, mut rx) = registry.register();
        let (_other, mut other_rx) = registry.register();

        assert!(registry.send_to(&id, "test message".into()));
        assert_eq!(rx.recv().await.unwrap(), "test message");
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn send_to_unknown_peer() {
        let registry = registry(32);
        assert!(!registry.send_to(&PeerId::new(), "test".into()));
    }

    #[test]
    fn send_to_full_queue_drops() {
        let registry = registry(2);
        let (id, _rx) = registry.register();

        assert!(registry.send_to(&id, "msg1".into()));
        assert!(registry.send_to(&id, "msg2".into()));
        assert!(!registry.send_to(&id, "msg3".into()));
    }

    #[test]
    fn pong_keeps_peer_alive() {
        let (tx, _rx) = mpsc::channel(1);
        let peer = Peer::new(PeerId::new(), tx);
        assert!(peer.is_alive(Duration::from_secs(90)));
        peer.record_pong();
        assert!(peer.is_alive(Duration::from_secs(90)));
    }

    #[test]
    fn cleanup_removes_silent_peers() {
        let registry = registry(32);
        let (id, _rx) = registry.register();
        let (_alive, _rx2) = registry.register();

        registry.get(&id).unwrap().last_pong.store(0, Ordering::Relaxed);

        let removed = registry.cleanup_dead_peers();
        assert_eq!(removed, vec![id]);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn cleanup_task_reports_disconnects() {
        let registry = Arc::new(registry(32));
        let (id, _rx) = registry.register();
        registry.get(&id).unwrap().last_pong.store(0, Ordering::Relaxed);

        let (tx, mut inbound) = mpsc::channel(8);
        let handle = start_cleanup_task(Arc::clone(&registry), tx, Duration::from_millis(10));

        match inbound.recv().await.unwrap() {
            Inbound::Disconnected { peer } => assert_eq!(peer, id),
            other => panic!("unexpected inbound: {other:?}"),
        }
        handle.abort();
    }
}
