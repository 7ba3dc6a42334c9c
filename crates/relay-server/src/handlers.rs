//! Command handlers.
//!
//! Each command runs in two parts. The synchronous prefix (validation, session
//! and buffer mutation, the flush take) executes inline on the processor task,
//! so commands from one client observe each other in arrival order. Whatever
//! talks to the store is returned as a [`StoreTask`] for the caller to spawn.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use relay_core::{BlobRef, PeerId, SessionId};
use relay_store::{BlobListing, BlobStore, WrittenBlob};

use crate::client::PeerRegistry;
use crate::dispatcher::ResponseDispatcher;
use crate::error::{RelayError, BUFFER_NOT_FOUND};
use crate::pager::{self, PageItems};
use crate::protocol::*;
use crate::session::SessionRegistry;

/// The store-bound remainder of a command.
pub type StoreTask = BoxFuture<'static, ()>;

const MISSING_NAME: &str = "Data Missing Name";
const CREATE_FAILED: &str = "Error Creating Container";

/// Shared relay state: the store, the session and peer registries, and the
/// dispatcher that routes replies.
pub struct Relay {
    store: Arc<dyn BlobStore>,
    sessions: Arc<SessionRegistry>,
    peers: Arc<PeerRegistry>,
    dispatcher: ResponseDispatcher,
}

impl Relay {
    pub fn new(store: Arc<dyn BlobStore>, peers: Arc<PeerRegistry>) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = ResponseDispatcher::new(Arc::clone(&sessions), Arc::clone(&peers));
        Self {
            store,
            sessions,
            peers,
            dispatcher,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Decode one raw text frame from `peer` and run it.
    pub fn handle_frame(self: &Arc<Self>, peer: &PeerId, text: &str) -> Option<StoreTask> {
        let frame: EventFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(peer_id = %peer, error = %e, "Malformed frame");
                let error = RelayError::Validation(format!("Malformed frame: {e}"));
                self.dispatcher
                    .send_to_peer(peer, SERVER_MESSAGE, error_reply(&error, None, None));
                return None;
            }
        };

        match Request::parse(&frame) {
            Ok(request) => self.handle(peer, request),
            Err(rejected) => {
                tracing::debug!(
                    peer_id = %peer,
                    session_id = %rejected.session,
                    event = %frame.event,
                    error_kind = rejected.error.error_kind(),
                    "Rejected frame"
                );
                let reply = error_reply(&rejected.error, None, None);
                if rejected.session.is_empty() {
                    self.dispatcher.send_to_peer(peer, rejected.reply_event, reply);
                } else {
                    self.dispatcher.send(&rejected.session, rejected.reply_event, reply);
                }
                None
            }
        }
    }

    /// Run a validated request.
    pub fn handle(self: &Arc<Self>, peer: &PeerId, request: Request) -> Option<StoreTask> {
        let Request { session, command } = request;
        let this = Arc::clone(self);

        match command {
            Command::Register => {
                self.register(peer, session);
                None
            }
            Command::CreateContainer(p) => {
                if p.container_name.is_empty() {
                    let error = RelayError::Validation(MISSING_NAME.into());
                    let message = Some(CREATE_FAILED.to_string());
                    self.reply_error(&session, SEND_CONTAINER_RESPONSE, &error, message, None);
                    return None;
                }
                Some(async move { this.create_container(&session, &p.container_name).await }.boxed())
            }
            Command::DeleteContainer(p) => {
                Some(async move { this.delete_container(&session, &p.container_name).await }.boxed())
            }
            Command::ClearContainer(p) => {
                Some(async move { this.clear_container(&session, &p.container_name).await }.boxed())
            }
            Command::ListBlobs(p) => Some(
                async move {
                    this.list_blobs(&session, &p.container_name, p.continuation_token.as_deref())
                        .await
                }
                .boxed(),
            ),
            Command::BlobExists(p) => {
                Some(async move { this.blob_exists(&session, p.blob()).await }.boxed())
            }
            Command::DeleteBlob(p) => {
                Some(async move { this.delete_blob(&session, p.blob()).await }.boxed())
            }
            Command::WriteBlob(p) => Some(
                async move {
                    let blob = p.blob();
                    this.write_blob(&session, &blob, &p.data, SEND_WRITE_BLOB_RESULT).await
                }
                .boxed(),
            ),
            Command::AppendBuffer(p) => {
                self.append_buffer(&session, &p.blob(), &p.data);
                None
            }
            Command::GetBuffer(p) => {
                self.get_buffer(&session, &p.blob());
                None
            }
            Command::ClearBuffer(p) => {
                self.clear_buffer(&session, &p.blob());
                None
            }
            Command::FlushBuffer(p) => {
                let blob = p.blob();
                let text = self.take_for_flush(&session, &blob)?;
                Some(
                    async move {
                        this.write_blob(&session, &blob, &text, SEND_WRITE_BUFFER_RESULT).await
                    }
                    .boxed(),
                )
            }
            Command::ReadBlob(p) => Some(async move { this.read_blob(&session, p).await }.boxed()),
            Command::ReadBlobRaw(p) => {
                Some(async move { this.read_blob_raw(&session, p.blob()).await }.boxed())
            }
        }
    }

    /// Drop every session still bound to a closed connection.
    pub fn disconnect(&self, peer: &PeerId) {
        let removed = self.sessions.disconnect(peer);
        if !removed.is_empty() {
            tracing::info!(peer_id = %peer, sessions = removed.len(), "Sessions closed on disconnect");
        }
    }

    fn reply_error(
        &self,
        session: &SessionId,
        event: &str,
        error: &RelayError,
        message: Option<String>,
        blob_name: Option<&str>,
    ) {
        tracing::debug!(
            session_id = %session,
            event,
            error_kind = error.error_kind(),
            error = %error,
            "Command failed"
        );
        self.dispatcher
            .send(session, event, error_reply(error, message, blob_name));
    }

    // ── Sessions & buffers ──────────────────────────────────────────────

    fn register(&self, peer: &PeerId, id: SessionId) {
        let id = if id.is_empty() { SessionId::from(peer) } else { id };
        self.sessions.register(id.clone(), peer.clone());
        tracing::info!(session_id = %id, peer_id = %peer, "Client registered");
    }

    fn append_buffer(&self, session_id: &SessionId, blob: &BlobRef, text: &str) {
        let Some(session) = self.sessions.lookup(session_id) else {
            let error = RelayError::not_found(BUFFER_NOT_FOUND);
            self.reply_error(session_id, SEND_ADD_TO_BUFFER_RESULT, &error, None, None);
            return;
        };
        let outcome = session.buffer().append(&blob.buffer_key(), text);
        tracing::trace!(session_id = %session_id, blob = %blob, len = text.len(), "Buffer append");
        self.dispatcher.send(
            session_id,
            SEND_ADD_TO_BUFFER_RESULT,
            Outcome::<()>::message(outcome.message()),
        );
    }

    fn get_buffer(&self, session_id: &SessionId, blob: &BlobRef) {
        let snapshot = match self.sessions.lookup(session_id) {
            Some(session) => session
                .buffer()
                .peek(&blob.buffer_key())
                .map(str::to_string),
            None => Err(RelayError::not_found(BUFFER_NOT_FOUND)),
        };
        match snapshot {
            Ok(buffer_data) => {
                self.dispatcher
                    .send(session_id, SEND_WRITE_BUFFER, BufferReply { buffer_data });
            }
            Err(e) => self.reply_error(session_id, SEND_WRITE_BUFFER, &e, None, None),
        }
    }

    fn clear_buffer(&self, session_id: &SessionId, blob: &BlobRef) {
        let cleared = match self.sessions.lookup(session_id) {
            Some(session) => session.buffer().clear(&blob.buffer_key()),
            None => Err(RelayError::not_found(BUFFER_NOT_FOUND)),
        };
        match cleared {
            Ok(()) => {
                self.dispatcher.send(
                    session_id,
                    SEND_CLEAR_WRITE_BUFFER_RESULT,
                    Outcome::<()>::message("Buffer Cleared"),
                );
            }
            Err(e) => self.reply_error(session_id, SEND_CLEAR_WRITE_BUFFER_RESULT, &e, None, None),
        }
    }

    /// Read and reset the buffered text in one step. The entry stays empty
    /// whatever happens to the write that follows.
    fn take_for_flush(&self, session_id: &SessionId, blob: &BlobRef) -> Option<String> {
        let taken = match self.sessions.lookup(session_id) {
            Some(session) => session.buffer().take_for_flush(&blob.buffer_key()),
            None => Err(RelayError::not_found(BUFFER_NOT_FOUND)),
        };
        match taken {
            Ok(text) => {
                tracing::debug!(session_id = %session_id, blob = %blob, chars = relay_core::char_len(&text), "Flushing buffer");
                Some(text)
            }
            Err(e) => {
                self.reply_error(session_id, SEND_WRITE_BUFFER_RESULT, &e, None, None);
                None
            }
        }
    }

    // ── Store-bound commands ────────────────────────────────────────────

    async fn create_container(&self, session: &SessionId, container: &str) {
        match self.store.create_container_if_not_exists(container).await {
            Ok(reply) => {
                tracing::info!(session_id = %session, container, created = reply.result.created, "Container ensured");
                let outcome = Outcome::message(format!("Container Created: {container}"))
                    .with_result(reply.result, reply.response);
                self.dispatcher.send(session, SEND_CONTAINER_RESPONSE, outcome);
            }
            Err(e) => self.reply_error(
                session,
                SEND_CONTAINER_RESPONSE,
                &e.into(),
                Some(CREATE_FAILED.into()),
                None,
            ),
        }
    }

    async fn delete_container(&self, session: &SessionId, container: &str) {
        match self.store.delete_container_if_exists(container).await {
            Ok(reply) => {
                tracing::info!(session_id = %session, container, deleted = reply.result, "Container delete");
                let outcome = Outcome::default().with_result(reply.result, reply.response);
                self.dispatcher.send(session, SEND_DELETE_CONTAINER_RESULT, outcome);
            }
            Err(e) => self.reply_error(session, SEND_DELETE_CONTAINER_RESULT, &e.into(), None, None),
        }
    }

    async fn list_blobs(&self, session: &SessionId, container: &str, continuation: Option<&str>) {
        match self.store.list_blobs(container, continuation).await {
            Ok(reply) => {
                self.dispatcher
                    .send(session, SEND_BLOB_LIST, ListReply { list: reply.result });
            }
            Err(e) => self.reply_error(
                session,
                SEND_BLOB_LIST,
                &e.into(),
                Some("Error Listing Blobs".into()),
                None,
            ),
        }
    }

    async fn blob_exists(&self, session: &SessionId, blob: BlobRef) {
        match self.store.blob_exists(&blob).await {
            Ok(reply) => {
                let outcome = Outcome {
                    result: Some(reply.result),
                    ..Outcome::default()
                }
                .with_blob_name(&blob.name);
                self.dispatcher.send(session, SEND_BLOB_EXIST_RESULT, outcome);
            }
            Err(e) => self.reply_error(
                session,
                SEND_BLOB_EXIST_RESULT,
                &e.into(),
                None,
                Some(&blob.name),
            ),
        }
    }

    async fn delete_blob(&self, session: &SessionId, blob: BlobRef) {
        match self.store.delete_blob_if_exists(&blob).await {
            Ok(reply) => {
                tracing::info!(session_id = %session, blob = %blob, deleted = reply.result, "Blob delete");
                let outcome = Outcome::<()> {
                    response: Some(reply.response),
                    ..Outcome::default()
                };
                self.dispatcher.send(session, SEND_DELETE_BLOB_RESULT, outcome);
            }
            Err(e) => self.reply_error(session, SEND_DELETE_BLOB_RESULT, &e.into(), None, None),
        }
    }

    /// Every listing segment, in order.
    async fn list_all(&self, container: &str) -> Result<BlobListing, RelayError> {
        let mut all = BlobListing::default();
        let mut continuation: Option<String> = None;
        loop {
            let reply = self
                .store
                .list_blobs(container, continuation.as_deref())
                .await?;
            all.entries.extend(reply.result.entries);
            match reply.result.continuation_token {
                Some(token) => continuation = Some(token),
                None => return Ok(all),
            }
        }
    }

    async fn clear_container(&self, session: &SessionId, container: &str) {
        let listing = match self.list_all(container).await {
            Ok(listing) => listing,
            Err(e) => {
                self.reply_error(
                    session,
                    SEND_CLEAR_CONTAINER_RESULT,
                    &e,
                    Some(format!("Error Clearing Container: {container}")),
                    None,
                );
                return;
            }
        };

        self.dispatcher.send(
            session,
            SERVER_MESSAGE,
            Outcome::<()>::message(format!("Clearing Container: {container}")),
        );

        let deletes = listing.entries.iter().map(|entry| {
            let blob = BlobRef::new(container, &entry.name);
            async move {
                let result = self.store.delete_blob_if_exists(&blob).await;
                (blob, result)
            }
        });
        let results = join_all(deletes).await;

        let mut deleted = 0;
        let mut failed = 0;
        for (blob, result) in results {
            match result {
                Ok(_) => deleted += 1,
                Err(e) => {
                    failed += 1;
                    self.reply_error(
                        session,
                        SEND_CLEAR_CONTAINER_RESULT,
                        &e.into(),
                        Some(format!("Error Clearing Container: {container} Blob {}", blob.name)),
                        Some(&blob.name),
                    );
                }
            }
        }

        tracing::info!(session_id = %session, container, deleted, failed, "Container cleared");
        self.dispatcher.send(
            session,
            SEND_CLEAR_CONTAINER_RESULT,
            ClearSummary {
                message: format!("Container Cleared: {container}"),
                deleted,
                failed,
            },
        );
    }

    /// Create `blob` from `text` unless it already exists. Existing blobs are
    /// never touched.
    pub async fn write_blob(&self, session: &SessionId, blob: &BlobRef, text: &str, reply_event: &str) {
        let exists = match self.store.blob_exists(blob).await {
            Ok(reply) => reply.result,
            Err(e) => {
                self.reply_error(
                    session,
                    reply_event,
                    &e.into(),
                    Some(format!("Error Checking {}--{} Existence", blob.container, blob.name)),
                    Some(&blob.name),
                );
                return;
            }
        };
        if exists {
            let error = RelayError::AlreadyExists(blob.clone());
            self.reply_error(session, reply_event, &error, None, Some(&blob.name));
            return;
        }

        match self.store.create_blob_from_text(blob, text).await {
            Ok(reply) => {
                tracing::info!(session_id = %session, blob = %blob, chars = relay_core::char_len(text), "Blob written");
                let outcome = Outcome::<WrittenBlob>::default()
                    .with_result(reply.result, reply.response)
                    .with_blob_name(&blob.name);
                self.dispatcher.send(session, reply_event, outcome);
            }
            Err(e) => self.reply_error(session, reply_event, &e.into(), None, Some(&blob.name)),
        }
    }

    /// Existence check then full download. Failures are reported on
    /// `sendFileData` and yield `None`.
    async fn fetch_text(&self, session: &SessionId, blob: &BlobRef) -> Option<String> {
        let exists = match self.store.blob_exists(blob).await {
            Ok(reply) => reply.result,
            Err(e) => {
                self.reply_error(
                    session,
                    SEND_FILE_DATA,
                    &e.into(),
                    Some(format!("Error Checking for {} blob {}", blob.container, blob.name)),
                    Some(&blob.name),
                );
                return None;
            }
        };
        if !exists {
            let error = RelayError::not_found(format!(
                "Blob {} / {} does not exist",
                blob.container, blob.name
            ));
            self.reply_error(session, SEND_FILE_DATA, &error, None, Some(&blob.name));
            return None;
        }

        match self.store.get_blob_text(blob).await {
            Ok(reply) => Some(reply.result),
            Err(e) => {
                self.reply_error(
                    session,
                    SEND_FILE_DATA,
                    &e.into(),
                    Some("Error Getting Existing Blob's data".into()),
                    Some(&blob.name),
                );
                None
            }
        }
    }

    async fn read_blob(&self, session: &SessionId, params: ReadParams) {
        let blob = params.blob();
        let Some(text) = self.fetch_text(session, &blob).await else {
            return;
        };
        let page = pager::page(&text, params.separator.as_deref(), params.start, params.range);
        // Whole-blob reads echo the sentinel back as the cursor.
        let last_part_sent = page.last_index_sent.map_or(pager::WHOLE_BLOB, |i| i as i64);
        let reply = FileDataReply {
            file_data: page.items,
            last_part_sent: Some(last_part_sent),
            end_of_blob: Some(page.end_of_data),
            blob_name: blob.name,
        };
        self.dispatcher.send(session, SEND_FILE_DATA, reply);
    }

    async fn read_blob_raw(&self, session: &SessionId, blob: BlobRef) {
        let Some(text) = self.fetch_text(session, &blob).await else {
            return;
        };
        let reply = FileDataReply {
            file_data: PageItems::Whole(text),
            last_part_sent: None,
            end_of_blob: None,
            blob_name: blob.name,
        };
        self.dispatcher.send(session, SEND_FILE_DATA, reply);
    }
}

/// Decode a reply frame as `(event, payload)` with the envelope stripped.
#[cfg(test)]
pub(crate) fn unwrap_frame(text: &str) -> (String, serde_json::Value) {
    let mut frame: serde_json::Value = serde_json::from_str(text).unwrap();
    let event = frame["event"].as_str().unwrap().to_string();
    let payload = frame["data"]["data"].take();
    (event, payload)
}
