//! Wire format: named JSON events in both directions.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. Request payloads
//! carry the session `id`; responses wrap their payload as `{"data": ...}`.

use relay_core::{BlobRef, SessionId};
use relay_store::{BlobListing, BlobStoreError, StoreResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::pager::PageItems;

// ── Request events ──────────────────────────────────────────────────────

pub const NEW_CLIENT: &str = "newClient";
pub const CREATE_CONTAINER: &str = "createContainerIfNotExists";
pub const DELETE_CONTAINER: &str = "deleteContainer";
pub const CLEAR_CONTAINER: &str = "clearContainer";
pub const LIST_BLOBS: &str = "listBlobsInContainer";
pub const BLOB_EXISTS: &str = "doesBlobExist";
pub const DELETE_BLOB: &str = "deleteBlob";
pub const WRITE_BLOB: &str = "writeToBlob";
pub const ADD_TO_BUFFER: &str = "addToBuffer";
pub const GET_BUFFER: &str = "getWriteBuffer";
pub const CLEAR_BUFFER: &str = "clearWriteBuffer";
pub const WRITE_FROM_BUFFER: &str = "writeFromBuffer";
pub const READ_BLOB: &str = "readFromBlob";
pub const READ_BLOB_RAW: &str = "readFromBlobRaw";

// ── Response events ─────────────────────────────────────────────────────

pub const SEND_BLOB_LIST: &str = "sendBlobList";
pub const SEND_FILE_DATA: &str = "sendFileData";
pub const SEND_CONTAINER_RESPONSE: &str = "sendContainerResponse";
pub const SEND_DELETE_BLOB_RESULT: &str = "sendDeleteBlobResult";
pub const SEND_DELETE_CONTAINER_RESULT: &str = "sendDeleteContainerResult";
pub const SEND_CLEAR_CONTAINER_RESULT: &str = "sendClearContainerResult";
pub const SEND_WRITE_BLOB_RESULT: &str = "sendWriteBlobResult";
pub const SEND_WRITE_BUFFER_RESULT: &str = "sendWriteBufferResult";
pub const SEND_ADD_TO_BUFFER_RESULT: &str = "sendAddToBufferResult";
pub const SEND_WRITE_BUFFER: &str = "sendWriteBuffer";
pub const SEND_CLEAR_WRITE_BUFFER_RESULT: &str = "sendClearWriteBufferResult";
pub const SEND_BLOB_EXIST_RESULT: &str = "sendBlobExistResult";
pub const SERVER_MESSAGE: &str = "serverMessage";

// ── Frames ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[cfg(test)]
impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// `{ data: payload }`, the envelope every response is wrapped in.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OutgoingFrame<'a, T> {
    pub event: &'a str,
    pub data: Envelope<T>,
}

// ── Request payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerParams {
    #[serde(default)]
    pub container_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub container_name: String,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobParams {
    pub container_name: String,
    pub blob_name: String,
}

impl BlobParams {
    pub fn blob(&self) -> BlobRef {
        BlobRef::new(&self.container_name, &self.blob_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteParams {
    pub container_name: String,
    pub blob_name: String,
    pub data: String,
}

impl WriteParams {
    pub fn blob(&self) -> BlobRef {
        BlobRef::new(&self.container_name, &self.blob_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
    pub container_name: String,
    pub blob_name: String,
    pub start: i64,
    pub range: usize,
    #[serde(default)]
    pub separator: Option<String>,
}

impl ReadParams {
    pub fn blob(&self) -> BlobRef {
        BlobRef::new(&self.container_name, &self.blob_name)
    }
}

/// One variant per request event.
#[derive(Debug, Clone)]
pub enum Command {
    Register,
    CreateContainer(ContainerParams),
    DeleteContainer(ContainerParams),
    ClearContainer(ContainerParams),
    ListBlobs(ListParams),
    BlobExists(BlobParams),
    DeleteBlob(BlobParams),
    WriteBlob(WriteParams),
    AppendBuffer(WriteParams),
    GetBuffer(BlobParams),
    ClearBuffer(BlobParams),
    FlushBuffer(BlobParams),
    ReadBlob(ReadParams),
    ReadBlobRaw(BlobParams),
}

#[derive(Debug, Clone)]
pub struct Request {
    pub session: SessionId,
    pub command: Command,
}

/// A frame that could not be turned into a [`Command`].
#[derive(Debug)]
pub struct Rejected {
    pub session: SessionId,
    pub reply_event: &'static str,
    pub error: RelayError,
}

fn params<T: DeserializeOwned>(data: &Value) -> Result<T, RelayError> {
    T::deserialize(data).map_err(|e| RelayError::Validation(format!("Invalid payload: {e}")))
}

impl Request {
    /// Validate a frame into a typed request. The session id is read leniently
    /// so that rejections can still be routed back to the sender.
    pub fn parse(frame: &EventFrame) -> Result<Self, Rejected> {
        let session = SessionId::from_raw(
            frame.data.get("id").and_then(Value::as_str).unwrap_or_default(),
        );
        let data = &frame.data;
        let (reply_event, command) = match frame.event.as_str() {
            NEW_CLIENT => (SERVER_MESSAGE, Ok(Command::Register)),
            CREATE_CONTAINER => (SEND_CONTAINER_RESPONSE, params(data).map(Command::CreateContainer)),
            DELETE_CONTAINER => (
                SEND_DELETE_CONTAINER_RESULT,
                params(data).map(Command::DeleteContainer),
            ),
            CLEAR_CONTAINER => (
                SEND_CLEAR_CONTAINER_RESULT,
                params(data).map(Command::ClearContainer),
            ),
            LIST_BLOBS => (SEND_BLOB_LIST, params(data).map(Command::ListBlobs)),
            BLOB_EXISTS => (SEND_BLOB_EXIST_RESULT, params(data).map(Command::BlobExists)),
            DELETE_BLOB => (SEND_DELETE_BLOB_RESULT, params(data).map(Command::DeleteBlob)),
            WRITE_BLOB => (SEND_WRITE_BLOB_RESULT, params(data).map(Command::WriteBlob)),
            ADD_TO_BUFFER => (SEND_ADD_TO_BUFFER_RESULT, params(data).map(Command::AppendBuffer)),
            GET_BUFFER => (SEND_WRITE_BUFFER, params(data).map(Command::GetBuffer)),
            CLEAR_BUFFER => (
                SEND_CLEAR_WRITE_BUFFER_RESULT,
                params(data).map(Command::ClearBuffer),
            ),
            WRITE_FROM_BUFFER => (SEND_WRITE_BUFFER_RESULT, params(data).map(Command::FlushBuffer)),
            READ_BLOB => (SEND_FILE_DATA, params(data).map(Command::ReadBlob)),
            READ_BLOB_RAW => (SEND_FILE_DATA, params(data).map(Command::ReadBlobRaw)),
            other => {
                return Err(Rejected {
                    session,
                    reply_event: SERVER_MESSAGE,
                    error: RelayError::Validation(format!("Unknown event: {other}")),
                });
            }
        };

        match command {
            Ok(command) => Ok(Self { session, command }),
            Err(error) => Err(Rejected {
                session,
                reply_event,
                error,
            }),
        }
    }
}

// ── Response payloads ───────────────────────────────────────────────────

/// The `Error` field: a store failure forwarded as-is, or a relay message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyError {
    Store(BlobStoreError),
    Text(String),
}

impl From<&RelayError> for ReplyError {
    fn from(err: &RelayError) -> Self {
        match err {
            RelayError::RemoteStore(e) => Self::Store(e.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// General-purpose reply: any subset of `Message`, `Error`, `Result`,
/// `Response` and `BlobName`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Outcome<T = ()> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<StoreResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_name: Option<String>,
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Self {
            message: None,
            error: None,
            result: None,
            response: None,
            blob_name: None,
        }
    }
}

impl<T> Outcome<T> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: &RelayError) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: T, response: StoreResponse) -> Self {
        self.result = Some(result);
        self.response = Some(response);
        self
    }

    pub fn with_blob_name(mut self, name: impl Into<String>) -> Self {
        self.blob_name = Some(name.into());
        self
    }
}

/// Size-limit rejection from `writeFromBuffer`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SizeLimitReply {
    pub error: String,
    pub max: usize,
    pub length: usize,
    pub over_by: usize,
}

#[derive(Debug, Serialize)]
pub struct ListReply {
    pub list: BlobListing,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BufferReply {
    pub buffer_data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDataReply {
    pub file_data: PageItems,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_part_sent: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_blob: Option<bool>,
    #[serde(rename = "BlobName")]
    pub blob_name: String,
}

/// Final report of a `clearContainer` run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClearSummary {
    pub message: String,
    pub deleted: usize,
    pub failed: usize,
}

/// Serialize the reply for a failed command, picking the size-limit shape
/// where it applies.
pub fn error_reply(error: &RelayError, message: Option<String>, blob_name: Option<&str>) -> Value {
    let value = match error {
        RelayError::SizeLimitExceeded { max, length, over_by } => serde_json::to_value(SizeLimitReply {
            error: error.to_string(),
            max: *max,
            length: *length,
            over_by: *over_by,
        }),
        _ => {
            let mut outcome = Outcome::<()>::failed(error);
            outcome.message = message;
            outcome.blob_name = blob_name.map(str::to_string);
            serde_json::to_value(outcome)
        }
    };
    value.unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: &str, data: Value) -> EventFrame {
        EventFrame::new(event, data)
    }

    #[test]
    fn parses_event_frame() {
        let f: EventFrame =
            serde_json::from_str(r#"{"event":"newClient","data":{"id":"p1"}}"#).unwrap();
        assert_eq!(f.event, "newClient");
        assert_eq!(f.data["id"], "p1");
    }

    #[test]
    fn frame_without_data_defaults_to_null() {
        let f: EventFrame = serde_json::from_str(r#"{"event":"newClient"}"#).unwrap();
        assert!(f.data.is_null());
        let req = Request::parse(&f).unwrap();
        assert!(req.session.is_empty());
    }

    #[test]
    fn parses_write_command() {
        let req = Request::parse(&frame(
            WRITE_BLOB,
            json!({"id": "p1", "containerName": "c", "blobName": "b", "data": "hello"}),
        ))
        .unwrap();
        assert_eq!(req.session.as_str(), "p1");
        match req.command {
            Command::WriteBlob(p) => {
                assert_eq!(p.blob(), BlobRef::new("c", "b"));
                assert_eq!(p.data, "hello");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_read_command_with_optional_separator() {
        let req = Request::parse(&frame(
            READ_BLOB,
            json!({"id": "p1", "containerName": "c", "blobName": "b", "start": -1, "range": 10}),
        ))
        .unwrap();
        match req.command {
            Command::ReadBlob(p) => {
                assert_eq!(p.start, -1);
                assert!(p.separator.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn missing_field_is_rejected_on_reply_event() {
        let rejected = Request::parse(&frame(
            ADD_TO_BUFFER,
            json!({"id": "p1", "containerName": "c", "blobName": "b"}),
        ))
        .unwrap_err();
        assert_eq!(rejected.session.as_str(), "p1");
        assert_eq!(rejected.reply_event, SEND_ADD_TO_BUFFER_RESULT);
        assert!(rejected.error.to_string().contains("data"));
    }

    #[test]
    fn negative_range_is_rejected() {
        let rejected = Request::parse(&frame(
            READ_BLOB,
            json!({"id": "p1", "containerName": "c", "blobName": "b", "start": 0, "range": -2}),
        ))
        .unwrap_err();
        assert_eq!(rejected.reply_event, SEND_FILE_DATA);
        assert_eq!(rejected.error.error_kind(), "validation");
    }

    #[test]
    fn unknown_event_is_rejected_on_server_message() {
        let rejected = Request::parse(&frame("formatDisk", json!({"id": "p1"}))).unwrap_err();
        assert_eq!(rejected.reply_event, SERVER_MESSAGE);
        assert_eq!(rejected.error.to_string(), "Unknown event: formatDisk");
    }

    #[test]
    fn create_container_tolerates_missing_name() {
        let req = Request::parse(&frame(CREATE_CONTAINER, json!({"id": "p1"}))).unwrap();
        match req.command {
            Command::CreateContainer(p) => assert!(p.container_name.is_empty()),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn outgoing_frame_wraps_payload() {
        let out = OutgoingFrame {
            event: SEND_ADD_TO_BUFFER_RESULT,
            data: Envelope { data: Outcome::<()>::message("Created Buffer") },
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(
            json,
            json!({"event": "sendAddToBufferResult", "data": {"data": {"Message": "Created Buffer"}}})
        );
    }

    #[test]
    fn size_limit_reply_shape() {
        let err = RelayError::SizeLimitExceeded { max: 32_000_000, length: 32_000_005, over_by: 5 };
        let json = error_reply(&err, None, None);
        assert_eq!(json["Max"], 32_000_000);
        assert_eq!(json["Length"], 32_000_005);
        assert_eq!(json["OverBy"], 5);
        assert!(json["Error"].is_string());
    }

    #[test]
    fn store_errors_are_forwarded_as_objects() {
        let err = RelayError::RemoteStore(BlobStoreError::Unavailable("down".into()));
        let json = error_reply(&err, Some("Error Listing Blobs".into()), Some("b"));
        assert_eq!(json["Error"]["code"], "ServerBusy");
        assert_eq!(json["Message"], "Error Listing Blobs");
        assert_eq!(json["BlobName"], "b");
    }

    #[test]
    fn file_data_reply_field_names() {
        let reply = FileDataReply {
            file_data: PageItems::Records(vec!["a".into()]),
            last_part_sent: Some(1),
            end_of_blob: Some(false),
            blob_name: "b".into(),
        };
        let json = serde_json::to_value(reply).unwrap();
        assert_eq!(
            json,
            json!({"fileData": ["a"], "lastPartSent": 1, "endOfBlob": false, "BlobName": "b"})
        );
    }
}
