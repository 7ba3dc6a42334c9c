pub mod blob;
pub mod ids;

pub use blob::{char_len, BlobRef, MAX_FLUSH_CHARS};
pub use ids::{PeerId, SessionId};
