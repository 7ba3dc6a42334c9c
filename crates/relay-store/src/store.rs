use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::BlobRef;
use serde::Serialize;

use crate::error::BlobStoreError;

/// Most entries returned by one listing call. Matches the common cloud limit.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 5000;

/// Transport-level summary of a store call, sent to clients as `Response`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponse {
    pub is_successful: bool,
    pub status_code: u16,
}

impl StoreResponse {
    pub fn ok() -> Self {
        Self { is_successful: true, status_code: 200 }
    }

    pub fn created() -> Self {
        Self { is_successful: true, status_code: 201 }
    }

    pub fn accepted() -> Self {
        Self { is_successful: true, status_code: 202 }
    }

    pub fn not_found() -> Self {
        Self { is_successful: true, status_code: 404 }
    }
}

/// A successful store call: the result value plus its response summary.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreReply<T> {
    pub result: T,
    pub response: StoreResponse,
}

impl<T> StoreReply<T> {
    pub fn new(result: T, response: StoreResponse) -> Self {
        Self { result, response }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResult {
    pub name: String,
    /// False when the container already existed.
    pub created: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobEntry {
    pub name: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
}

/// One segment of a container listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobListing {
    pub entries: Vec<BlobEntry>,
    /// Present when more entries remain; pass back to fetch the next segment.
    pub continuation_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrittenBlob {
    pub container: String,
    pub name: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
}

/// Remote object storage as seen by the relay.
///
/// Every call may fail with a [`BlobStoreError`]; callers forward failures
/// without retrying.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_container_if_not_exists(
        &self,
        container: &str,
    ) -> Result<StoreReply<ContainerResult>, BlobStoreError>;

    /// Result is `true` when a container was actually removed.
    async fn delete_container_if_exists(
        &self,
        container: &str,
    ) -> Result<StoreReply<bool>, BlobStoreError>;

    /// List one segment of blobs, ordered by name.
    async fn list_blobs(
        &self,
        container: &str,
        continuation: Option<&str>,
    ) -> Result<StoreReply<BlobListing>, BlobStoreError>;

    async fn blob_exists(&self, blob: &BlobRef) -> Result<StoreReply<bool>, BlobStoreError>;

    async fn get_blob_text(&self, blob: &BlobRef) -> Result<StoreReply<String>, BlobStoreError>;

    /// Create (or replace) a blob with `text` as its content.
    async fn create_blob_from_text(
        &self,
        blob: &BlobRef,
        text: &str,
    ) -> Result<StoreReply<WrittenBlob>, BlobStoreError>;

    /// Result is `true` when a blob was actually removed.
    async fn delete_blob_if_exists(&self, blob: &BlobRef)
        -> Result<StoreReply<bool>, BlobStoreError>;
}

/// Slice a sorted name list into a listing segment starting after `continuation`.
pub(crate) fn paginate(
    mut entries: Vec<BlobEntry>,
    continuation: Option<&str>,
    page_size: usize,
) -> BlobListing {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let start = match continuation {
        Some(token) => entries.partition_point(|e| e.name.as_str() <= token),
        None => 0,
    };
    let page_size = page_size.max(1);
    let mut page: Vec<BlobEntry> = entries.into_iter().skip(start).collect();
    let continuation_token = if page.len() > page_size {
        page.truncate(page_size);
        page.last().map(|e| e.name.clone())
    } else {
        None
    };
    BlobListing {
        entries: page,
        continuation_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> BlobEntry {
        BlobEntry {
            name: name.into(),
            content_length: 0,
            last_modified: Utc::now(),
        }
    }

    fn names(listing: &BlobListing) -> Vec<&str> {
        listing.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn paginate_single_page() {
        let listing = paginate(vec![entry("b"), entry("a")], None, 10);
        assert_eq!(names(&listing), vec!["a", "b"]);
        assert!(listing.continuation_token.is_none());
    }

    #[test]
    fn paginate_walks_segments() {
        let all = vec![entry("a"), entry("b"), entry("c"), entry("d"), entry("e")];
        let first = paginate(all.clone(), None, 2);
        assert_eq!(names(&first), vec!["a", "b"]);
        assert_eq!(first.continuation_token.as_deref(), Some("b"));

        let second = paginate(all.clone(), first.continuation_token.as_deref(), 2);
        assert_eq!(names(&second), vec!["c", "d"]);

        let third = paginate(all, second.continuation_token.as_deref(), 2);
        assert_eq!(names(&third), vec!["e"]);
        assert!(third.continuation_token.is_none());
    }

    #[test]
    fn exact_page_has_no_token() {
        let listing = paginate(vec![entry("a"), entry("b")], None, 2);
        assert_eq!(listing.entries.len(), 2);
        assert!(listing.continuation_token.is_none());
    }

    #[test]
    fn response_serializes_camel_case() {
        let json = serde_json::to_value(StoreResponse::created()).unwrap();
        assert_eq!(json["isSuccessful"], true);
        assert_eq!(json["statusCode"], 201);
    }
}
