//! In-process blob store.
//!
//! Holds everything in a `BTreeMap` behind a lock. Used by the test suites and
//! by `--store memory` deployments where losing data on restart is fine.
//! Individual operations can be made to fail on demand, and calls are
//! counted, so handler tests can assert exactly what reached the store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use relay_core::BlobRef;

use crate::error::BlobStoreError;
use crate::store::{
    paginate, BlobEntry, BlobListing, BlobStore, ContainerResult, StoreReply, StoreResponse,
    WrittenBlob, DEFAULT_LIST_PAGE_SIZE,
};

/// Store operations, used to inject failures and count calls.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StoreOp {
    CreateContainer,
    DeleteContainer,
    ListBlobs,
    BlobExists,
    GetBlobText,
    CreateBlob,
    DeleteBlob,
}

#[derive(Clone, Debug)]
struct StoredBlob {
    text: String,
    last_modified: DateTime<Utc>,
}

type Container = BTreeMap<String, StoredBlob>;

pub struct MemoryBlobStore {
    containers: RwLock<BTreeMap<String, Container>>,
    page_size: usize,
    faults: Mutex<HashMap<StoreOp, BlobStoreError>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_LIST_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            page_size,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Make every later call of `op` fail with `error` until [`heal`](Self::heal).
    pub fn fail(&self, op: StoreOp, error: BlobStoreError) {
        self.faults.lock().insert(op, error);
    }

    pub fn heal(&self, op: StoreOp) {
        self.faults.lock().remove(&op);
    }

    /// How many times `op` has been invoked, failed calls included.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Direct read for assertions, bypassing call counting.
    pub fn peek_text(&self, blob: &BlobRef) -> Option<String> {
        self.containers
            .read()
            .get(&blob.container)
            .and_then(|c| c.get(&blob.name))
            .map(|b| b.text.clone())
    }

    fn enter(&self, op: StoreOp) -> Result<(), BlobStoreError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        match self.faults.lock().get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_container_if_not_exists(
        &self,
        container: &str,
    ) -> Result<StoreReply<ContainerResult>, BlobStoreError> {
        self.enter(StoreOp::CreateContainer)?;
        if container.is_empty() {
            return Err(BlobStoreError::InvalidName("container name is empty".into()));
        }
        let mut containers = self.containers.write();
        let created = !containers.contains_key(container);
        if created {
            containers.insert(container.to_string(), Container::new());
        }
        let response = if created {
            StoreResponse::created()
        } else {
            StoreResponse::ok()
        };
        Ok(StoreReply::new(
            ContainerResult {
                name: container.to_string(),
                created,
            },
            response,
        ))
    }

    async fn delete_container_if_exists(
        &self,
        container: &str,
    ) -> Result<StoreReply<bool>, BlobStoreError> {
        self.enter(StoreOp::DeleteContainer)?;
        let deleted = self.containers.write().remove(container).is_some();
        let response = if deleted {
            StoreResponse::accepted()
        } else {
            StoreResponse::not_found()
        };
        Ok(StoreReply::new(deleted, response))
    }

    async fn list_blobs(
        &self,
        container: &str,
        continuation: Option<&str>,
    ) -> Result<StoreReply<BlobListing>, BlobStoreError> {
        self.enter(StoreOp::ListBlobs)?;
        let containers = self.containers.read();
        let blobs = containers
            .get(container)
            .ok_or_else(|| BlobStoreError::ContainerNotFound(container.to_string()))?;
        let entries = blobs
            .iter()
            .map(|(name, blob)| BlobEntry {
                name: name.clone(),
                content_length: blob.text.len() as u64,
                last_modified: blob.last_modified,
            })
            .collect();
        Ok(StoreReply::new(
            paginate(entries, continuation, self.page_size),
            StoreResponse::ok(),
        ))
    }

    async fn blob_exists(&self, blob: &BlobRef) -> Result<StoreReply<bool>, BlobStoreError> {
        self.enter(StoreOp::BlobExists)?;
        let exists = self
            .containers
            .read()
            .get(&blob.container)
            .is_some_and(|c| c.contains_key(&blob.name));
        let response = if exists {
            StoreResponse::ok()
        } else {
            StoreResponse::not_found()
        };
        Ok(StoreReply::new(exists, response))
    }

    async fn get_blob_text(&self, blob: &BlobRef) -> Result<StoreReply<String>, BlobStoreError> {
        self.enter(StoreOp::GetBlobText)?;
        let containers = self.containers.read();
        let text = containers
            .get(&blob.container)
            .and_then(|c| c.get(&blob.name))
            .map(|b| b.text.clone())
            .ok_or_else(|| BlobStoreError::BlobNotFound {
                container: blob.container.clone(),
                blob: blob.name.clone(),
            })?;
        Ok(StoreReply::new(text, StoreResponse::ok()))
    }

    async fn create_blob_from_text(
        &self,
        blob: &BlobRef,
        text: &str,
    ) -> Result<StoreReply<WrittenBlob>, BlobStoreError> {
        self.enter(StoreOp::CreateBlob)?;
        if blob.name.is_empty() {
            return Err(BlobStoreError::InvalidName("blob name is empty".into()));
        }
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&blob.container)
            .ok_or_else(|| BlobStoreError::ContainerNotFound(blob.container.clone()))?;
        let now = Utc::now();
        container.insert(
            blob.name.clone(),
            StoredBlob {
                text: text.to_string(),
                last_modified: now,
            },
        );
        Ok(StoreReply::new(
            WrittenBlob {
                container: blob.container.clone(),
                name: blob.name.clone(),
                content_length: text.len() as u64,
                last_modified: now,
            },
            StoreResponse::created(),
        ))
    }

    async fn delete_blob_if_exists(
        &self,
        blob: &BlobRef,
    ) -> Result<StoreReply<bool>, BlobStoreError> {
        self.enter(StoreOp::DeleteBlob)?;
        let deleted = self
            .containers
            .write()
            .get_mut(&blob.container)
            .is_some_and(|c| c.remove(&blob.name).is_some());
        let response = if deleted {
            StoreResponse::accepted()
        } else {
            StoreResponse::not_found()
        };
        Ok(StoreReply::new(deleted, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_container_reports_created_once() {
        let store = MemoryBlobStore::new();
        let first = store.create_container_if_not_exists("saves").await.unwrap();
        assert!(first.result.created);
        assert_eq!(first.response.status_code, 201);

        let second = store.create_container_if_not_exists("saves").await.unwrap();
        assert!(!second.result.created);
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = MemoryBlobStore::new();
        store.create_container_if_not_exists("c").await.unwrap();
        let blob = BlobRef::new("c", "b.txt");

        assert!(!store.blob_exists(&blob).await.unwrap().result);
        store.create_blob_from_text(&blob, "hello").await.unwrap();
        assert!(store.blob_exists(&blob).await.unwrap().result);
        assert_eq!(store.get_blob_text(&blob).await.unwrap().result, "hello");
    }

    #[tokio::test]
    async fn write_into_missing_container_fails() {
        let store = MemoryBlobStore::new();
        let err = store
            .create_blob_from_text(&BlobRef::new("nope", "b"), "x")
            .await
            .unwrap_err();
        assert_eq!(err, BlobStoreError::ContainerNotFound("nope".into()));
    }

    #[tokio::test]
    async fn read_missing_blob_fails() {
        let store = MemoryBlobStore::new();
        store.create_container_if_not_exists("c").await.unwrap();
        let err = store.get_blob_text(&BlobRef::new("c", "b")).await.unwrap_err();
        assert!(matches!(err, BlobStoreError::BlobNotFound { .. }));
    }

    #[tokio::test]
    async fn delete_blob_if_exists() {
        let store = MemoryBlobStore::new();
        store.create_container_if_not_exists("c").await.unwrap();
        let blob = BlobRef::new("c", "b");
        store.create_blob_from_text(&blob, "x").await.unwrap();

        assert!(store.delete_blob_if_exists(&blob).await.unwrap().result);
        assert!(!store.delete_blob_if_exists(&blob).await.unwrap().result);
    }

    #[tokio::test]
    async fn list_is_segmented() {
        let store = MemoryBlobStore::with_page_size(2);
        store.create_container_if_not_exists("c").await.unwrap();
        for name in ["a", "b", "c"] {
            store.create_blob_from_text(&BlobRef::new("c", name), name).await.unwrap();
        }

        let first = store.list_blobs("c", None).await.unwrap().result;
        assert_eq!(first.entries.len(), 2);
        let token = first.continuation_token.unwrap();
        let second = store.list_blobs("c", Some(&token)).await.unwrap().result;
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].name, "c");
    }

    #[tokio::test]
    async fn list_missing_container_fails() {
        let store = MemoryBlobStore::new();
        assert!(store.list_blobs("ghost", None).await.is_err());
    }

    #[tokio::test]
    async fn injected_fault_and_call_counts() {
        let store = MemoryBlobStore::new();
        store.fail(StoreOp::BlobExists, BlobStoreError::Unavailable("down".into()));

        let blob = BlobRef::new("c", "b");
        assert!(store.blob_exists(&blob).await.is_err());
        assert_eq!(store.calls(StoreOp::BlobExists), 1);

        store.heal(StoreOp::BlobExists);
        assert!(store.blob_exists(&blob).await.is_ok());
        assert_eq!(store.calls(StoreOp::BlobExists), 2);
        assert_eq!(store.calls(StoreOp::CreateBlob), 0);
    }

    #[tokio::test]
    async fn delete_container_removes_blobs() {
        let store = MemoryBlobStore::new();
        store.create_container_if_not_exists("c").await.unwrap();
        let blob = BlobRef::new("c", "b");
        store.create_blob_from_text(&blob, "x").await.unwrap();

        assert!(store.delete_container_if_exists("c").await.unwrap().result);
        assert!(store.peek_text(&blob).is_none());
        assert!(!store.delete_container_if_exists("c").await.unwrap().result);
    }
}
