use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest buffered text (in characters) that may be flushed in one write.
/// Anything at or above this is rejected.
pub const MAX_FLUSH_CHARS: usize = 32_000_000;

/// A `(container, blob)` pair. Both names are opaque.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlobRef {
    pub container: String,
    pub name: String,
}

impl BlobRef {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }

    /// Write-buffer key: plain concatenation, no delimiter.
    ///
    /// `("ab", "c")` and `("a", "bc")` share a key, matching what existing
    /// clients expect.
    pub fn buffer_key(&self) -> String {
        let mut key = String::with_capacity(self.container.len() + self.name.len());
        key.push_str(&self.container);
        key.push_str(&self.name);
        key
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Length of `text` in characters, the unit the flush ceiling is expressed in.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
