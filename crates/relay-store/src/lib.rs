//! Blob store adapters.
//!
//! [`BlobStore`] is the seam between the relay and whatever object storage
//! actually holds the data. Two adapters live here: [`MemoryBlobStore`] for
//! tests and throwaway deployments, and [`FsBlobStore`] which maps containers
//! to directories on local disk.

pub mod error;
pub mod fs;
pub mod memory;
pub mod store;

pub use error::BlobStoreError;
pub use fs::FsBlobStore;
pub use memory::{MemoryBlobStore, StoreOp};
pub use store::{
    BlobEntry, BlobListing, BlobStore, ContainerResult, StoreReply, StoreResponse, WrittenBlob,
    DEFAULT_LIST_PAGE_SIZE,
};
