use relay_core::BlobRef;
use relay_store::BlobStoreError;

pub const BUFFER_NOT_FOUND: &str = "Buffer Not Found";
pub const BUFFER_EMPTY: &str = "Buffer is empty";
pub const BUFFER_KEY_NOT_FOUND: &str = "Buffer not found";
pub const NOTHING_TO_FLUSH: &str = "No buffer to write from";

/// Everything a command can fail with. None of these are fatal to the process
/// and none are retried.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot Append to Existing File")]
    AlreadyExists(BlobRef),

    #[error("{0}")]
    NotFound(String),

    #[error("Write Buffer is over the {max} character limit")]
    SizeLimitExceeded {
        max: usize,
        length: usize,
        over_by: usize,
    },

    #[error("{0}")]
    RemoteStore(#[from] BlobStoreError),
}

impl RelayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::SizeLimitExceeded { .. } => "size_limit_exceeded",
            Self::RemoteStore(_) => "remote_store",
        }
    }
}
