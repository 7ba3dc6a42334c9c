use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::{HeaderName, ACCEPT, CONTENT_TYPE, ORIGIN};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use relay_store::BlobStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::client::{self, Inbound, PeerRegistry};
use crate::handlers::Relay;

/// Frames buffered between the sockets and the processor.
const INBOUND_QUEUE: usize = 1024;

/// How long shutdown waits for open connections before giving up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 80,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Reject intervals the timers cannot run with.
    pub fn validate(&self) -> Result<(), std::io::Error> {
        for (name, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("client_timeout", self.client_timeout),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if value.is_zero() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{name} must be non-zero"),
                ));
            }
        }
        Ok(())
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub peers: Arc<PeerRegistry>,
    pub inbound: mpsc::Sender<Inbound>,
    pub heartbeat: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_headers([
        ORIGIN,
        HeaderName::from_static("x-requested-with"),
        CONTENT_TYPE,
        ACCEPT,
    ]);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Bind, spawn the background tasks and start serving.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn BlobStore>,
) -> Result<ServerHandle, std::io::Error> {
    config.validate()?;
    let peers = Arc::new(PeerRegistry::new(config.max_send_queue, config.client_timeout));
    let relay = Arc::new(Relay::new(store, Arc::clone(&peers)));
    let shutdown = CancellationToken::new();

    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(INBOUND_QUEUE);

    let cleanup = client::start_cleanup_task(
        Arc::clone(&peers),
        inbound_tx.clone(),
        config.cleanup_interval,
    );
    let processor = tokio::spawn(process_inbound(
        inbound_rx,
        Arc::clone(&relay),
        shutdown.clone(),
    ));

    let app_state = AppState {
        relay: Arc::clone(&relay),
        peers,
        inbound: inbound_tx,
        heartbeat: config.heartbeat_interval,
    };
    let router = build_router(app_state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(host = %config.host, port = local_addr.port(), "Blob relay started");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        relay,
        shutdown,
        server,
        processor,
        cleanup,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive until
/// [`shutdown`](Self::shutdown).
pub struct ServerHandle {
    pub port: u16,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    processor: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Stop accepting connections, then wind down the background tasks.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.cleanup.abort();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.server).await.is_err() {
            tracing::warn!("Open connections outlived shutdown grace period");
        }
        let _ = self.processor.await;
        tracing::info!("Blob relay stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (peer_id, rx) = state.peers.register();
    tracing::info!(peer_id = %peer_id, "WebSocket peer connected");

    client::handle_ws_connection(
        socket,
        peer_id,
        rx,
        state.peers,
        state.inbound,
        state.heartbeat,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "peers": state.peers.count(),
        "sessions": state.relay.sessions().len(),
    }))
}

/// Run frames in arrival order. Store work is spawned so a slow store call
/// never holds up the next frame.
async fn process_inbound(
    mut rx: mpsc::Receiver<Inbound>,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) {
    loop {
        let inbound = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match inbound {
            Inbound::Frame { peer, text } => {
                if let Some(task) = relay.handle_frame(&peer, &text) {
                    tokio::spawn(task);
                }
            }
            Inbound::Disconnected { peer } => relay.disconnect(&peer),
        }
    }
    tracing::debug!("Inbound processor stopped");
}
