//! Per-session write buffer.
//!
//! Lets a client assemble a large blob from many small appends and push it to
//! the store in one write. Keys are `container ⧺ blob` (see
//! [`BlobRef::buffer_key`](relay_core::BlobRef::buffer_key)).

use std::collections::HashMap;

use relay_core::{char_len, MAX_FLUSH_CHARS};

use crate::error::{RelayError, BUFFER_EMPTY, BUFFER_KEY_NOT_FOUND, NOTHING_TO_FLUSH};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Created,
    Extended,
}

impl AppendOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::Created => "Created Buffer",
            Self::Extended => "Added To Existing Buffer",
        }
    }
}

#[derive(Debug)]
pub struct WriteBuffer {
    entries: HashMap<String, String>,
    limit: usize,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            limit: MAX_FLUSH_CHARS,
        }
    }

    #[cfg(test)]
    fn with_limit(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            limit,
        }
    }

    /// Append `text` to `key`, creating the entry if needed. Never fails.
    pub fn append(&mut self, key: &str, text: &str) -> AppendOutcome {
        match self.entries.get_mut(key) {
            Some(existing) => {
                existing.push_str(text);
                AppendOutcome::Extended
            }
            None => {
                self.entries.insert(key.to_string(), text.to_string());
                AppendOutcome::Created
            }
        }
    }

    pub fn peek(&self, key: &str) -> Result<&str, RelayError> {
        self.entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| RelayError::not_found(BUFFER_EMPTY))
    }

    /// Empty the entry at `key`. The key itself stays.
    pub fn clear(&mut self, key: &str) -> Result<(), RelayError> {
        match self.entries.get_mut(key) {
            Some(existing) => {
                existing.clear();
                Ok(())
            }
            None => Err(RelayError::not_found(BUFFER_KEY_NOT_FOUND)),
        }
    }

    /// Hand out the accumulated text for a write and reset the entry to empty.
    ///
    /// Absent and empty entries yield "No buffer to write from". An entry at or
    /// over the ceiling is rejected and left untouched.
    pub fn take_for_flush(&mut self, key: &str) -> Result<String, RelayError> {
        let limit = self.limit;
        let Some(existing) = self.entries.get_mut(key) else {
            return Err(RelayError::not_found(NOTHING_TO_FLUSH));
        };
        if existing.is_empty() {
            return Err(RelayError::not_found(NOTHING_TO_FLUSH));
        }
        let length = char_len(existing);
        if length >= limit {
            return Err(RelayError::SizeLimitExceeded {
                max: limit,
                length,
                over_by: length - limit,
            });
        }
        Ok(std::mem::take(existing))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
