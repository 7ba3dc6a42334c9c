use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Failure reported by a blob store adapter.
///
/// Forwarded to clients verbatim; the relay never retries or masks these.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BlobStoreError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("blob not found: {container}/{blob}")]
    BlobNotFound { container: String, blob: String },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl BlobStoreError {
    /// HTTP-style status code, mirroring what a REST object store would answer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ContainerNotFound(_) | Self::BlobNotFound { .. } => 404,
            Self::InvalidName(_) => 400,
            Self::Io(_) => 500,
            Self::Unavailable(_) => 503,
        }
    }

    /// Short classification string for logging and the wire `code` field.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ContainerNotFound(_) => "ContainerNotFound",
            Self::BlobNotFound { .. } => "BlobNotFound",
            Self::InvalidName(_) => "InvalidResourceName",
            Self::Io(_) => "InternalError",
            Self::Unavailable(_) => "ServerBusy",
        }
    }
}

impl From<std::io::Error> for BlobStoreError {
    fn from(e: std::io::Error) -> Self {
        BlobStoreError::Io(e.to_string())
    }
}

// Wire shape: `{ code, message, statusCode }`.
impl Serialize for BlobStoreError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("BlobStoreError", 3)?;
        s.serialize_field("code", self.error_kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.serialize_field("statusCode", &self.status_code())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(BlobStoreError::ContainerNotFound("c".into()).status_code(), 404);
        assert_eq!(
            BlobStoreError::BlobNotFound { container: "c".into(), blob: "b".into() }.status_code(),
            404
        );
        assert_eq!(BlobStoreError::InvalidName("..".into()).status_code(), 400);
        assert_eq!(BlobStoreError::Io("disk".into()).status_code(), 500);
        assert_eq!(BlobStoreError::Unavailable("down".into()).status_code(), 503);
    }

    #[test]
    fn serializes_wire_shape() {
        let err = BlobStoreError::ContainerNotFound("saves".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "ContainerNotFound");
        assert_eq!(json["message"], "container not found: saves");
        assert_eq!(json["statusCode"], 404);
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: BlobStoreError = io.into();
        assert!(matches!(err, BlobStoreError::Io(_)));
    }
}
