//! Windowed reads over separator-delimited text.
//!
//! Stateless: the client carries the cursor and sends `lastPartSent` back as
//! the next `start`.

use serde::Serialize;

/// `start` value asking for the whole blob, unsplit.
pub const WHOLE_BLOB: i64 = -1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PageItems {
    Whole(String),
    Records(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub items: PageItems,
    /// One past the last record included. `None` for whole-blob reads.
    pub last_index_sent: Option<usize>,
    pub end_of_data: bool,
}

fn split_records(text: &str, separator: Option<&str>) -> Vec<String> {
    match separator {
        None => vec![text.to_string()],
        Some("") => text.chars().map(String::from).collect(),
        Some(sep) => text.split(sep).map(str::to_string).collect(),
    }
}

/// Cut one window of at most `window` records out of `text`, starting at `start`.
///
/// A `start` past the end is pulled back to the final record; negative starts
/// other than [`WHOLE_BLOB`] read from the beginning.
pub fn page(text: &str, separator: Option<&str>, start: i64, window: usize) -> Page {
    if start == WHOLE_BLOB {
        return Page {
            items: PageItems::Whole(text.to_string()),
            last_index_sent: None,
            end_of_data: true,
        };
    }

    let records = split_records(text, separator);
    let len = records.len();
    let mut start = usize::try_from(start).unwrap_or(0);
    if start > len {
        start = len.saturating_sub(1);
    }
    let end = start.saturating_add(window).min(len);

    let items: Vec<String> = records
        .into_iter()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect();
    let last_index_sent = start + items.len();

    Page {
        items: PageItems::Records(items),
        last_index_sent: Some(last_index_sent),
        end_of_data: last_index_sent >= len,
    }
}
