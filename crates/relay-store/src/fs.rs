//! Local-directory blob store.
//!
//! Layout: `<root>/<container>/<blob name>`. Blob names may contain `/`,
//! which become nested directories; listing flattens them back.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::BlobRef;
use tokio::fs;
use tracing::debug;

use crate::error::BlobStoreError;
use crate::store::{
    paginate, BlobEntry, BlobListing, BlobStore, ContainerResult, StoreReply, StoreResponse,
    WrittenBlob, DEFAULT_LIST_PAGE_SIZE,
};

pub struct FsBlobStore {
    root: PathBuf,
    page_size: usize,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BlobStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "fs blob store opened");
        Ok(Self {
            root,
            page_size: DEFAULT_LIST_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, BlobStoreError> {
        if container.is_empty()
            || container == "."
            || container == ".."
            || container.contains(['/', '\\'])
        {
            return Err(BlobStoreError::InvalidName(format!("container '{container}'")));
        }
        Ok(self.root.join(container))
    }

    fn blob_path(&self, blob: &BlobRef) -> Result<PathBuf, BlobStoreError> {
        let dir = self.container_path(&blob.container)?;
        let rel = Path::new(&blob.name);
        let clean = !blob.name.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(BlobStoreError::InvalidName(format!("blob '{}'", blob.name)));
        }
        Ok(dir.join(rel))
    }

    async fn require_container(&self, container: &str) -> Result<PathBuf, BlobStoreError> {
        let dir = self.container_path(container)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(BlobStoreError::ContainerNotFound(container.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::ContainerNotFound(container.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Walk `dir` and return every file as a `/`-joined name relative to it.
async fn collect_entries(dir: &Path) -> Result<Vec<BlobEntry>, BlobStoreError> {
    let mut entries = Vec::new();
    let mut pending = vec![(dir.to_path_buf(), String::new())];
    while let Some((path, prefix)) = pending.pop() {
        let mut read = fs::read_dir(&path).await?;
        while let Some(item) = read.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            let full = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let meta = item.metadata().await?;
            if meta.is_dir() {
                pending.push((item.path(), full));
            } else {
                entries.push(BlobEntry {
                    name: full,
                    content_length: meta.len(),
                    last_modified: modified(&meta),
                });
            }
        }
    }
    Ok(entries)
}

fn modified(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn create_container_if_not_exists(
        &self,
        container: &str,
    ) -> Result<StoreReply<ContainerResult>, BlobStoreError> {
        let dir = self.container_path(container)?;
        match fs::create_dir(&dir).await {
            Ok(()) => Ok(StoreReply::new(
                ContainerResult { name: container.to_string(), created: true },
                StoreResponse::created(),
            )),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(StoreReply::new(
                ContainerResult { name: container.to_string(), created: false },
                StoreResponse::ok(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_container_if_exists(
        &self,
        container: &str,
    ) -> Result<StoreReply<bool>, BlobStoreError> {
        let dir = self.container_path(container)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(StoreReply::new(true, StoreResponse::accepted())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(StoreReply::new(false, StoreResponse::not_found()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_blobs(
        &self,
        container: &str,
        continuation: Option<&str>,
    ) -> Result<StoreReply<BlobListing>, BlobStoreError> {
        let dir = self.require_container(container).await?;
        let entries = collect_entries(&dir).await?;
        Ok(StoreReply::new(
            paginate(entries, continuation, self.page_size),
            StoreResponse::ok(),
        ))
    }

    async fn blob_exists(&self, blob: &BlobRef) -> Result<StoreReply<bool>, BlobStoreError> {
        let path = self.blob_path(blob)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(StoreReply::new(true, StoreResponse::ok())),
            Ok(_) => Ok(StoreReply::new(false, StoreResponse::not_found())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(StoreReply::new(false, StoreResponse::not_found()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_blob_text(&self, blob: &BlobRef) -> Result<StoreReply<String>, BlobStoreError> {
        let path = self.blob_path(blob)?;
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(StoreReply::new(text, StoreResponse::ok())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobStoreError::BlobNotFound {
                container: blob.container.clone(),
                blob: blob.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_blob_from_text(
        &self,
        blob: &BlobRef,
        text: &str,
    ) -> Result<StoreReply<WrittenBlob>, BlobStoreError> {
        let path = self.blob_path(blob)?;
        self.require_container(&blob.container).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, text).await?;
        let meta = fs::metadata(&path).await?;
        Ok(StoreReply::new(
            WrittenBlob {
                container: blob.container.clone(),
                name: blob.name.clone(),
                content_length: meta.len(),
                last_modified: modified(&meta),
            },
            StoreResponse::created(),
        ))
    }

    async fn delete_blob_if_exists(
        &self,
        blob: &BlobRef,
    ) -> Result<StoreReply<bool>, BlobStoreError> {
        let path = self.blob_path(blob)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(StoreReply::new(true, StoreResponse::accepted())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(StoreReply::new(false, StoreResponse::not_found()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
