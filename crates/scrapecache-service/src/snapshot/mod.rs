//! Persistence of collector state across restarts.
//!
//! A collector writes a [`SnapshotRecord`] to its [`SnapshotStore`] after every collection
//! cycle and reads it back once on startup. Where the snapshot lives is configured by a single
//! location string, which is turned into a [`CacheSpec`] and a store by [`resolve`].

use std::sync::Arc;

mod azblob;
mod error;
mod filesystem;
mod record;
mod spec;
mod tag;

pub use azblob::{AzureBlobStore, BEARER_TOKEN_ENV, BlobCredential, SAS_TOKEN_ENV};
pub use error::{ConfigurationError, SnapshotError, StoreError};
pub use filesystem::FilesystemStore;
pub use record::{MetricList, MetricSample, MetricsByName, SnapshotRecord};
pub use spec::{BackendKind, CacheLocation, CacheSpec, StoreOptions, resolve};
pub use tag::build_cache_tag;

/// The backend persisting snapshots.
#[derive(Debug, Clone)]
pub enum SnapshotStore {
    /// A file on the local filesystem.
    Filesystem(FilesystemStore),
    /// A blob in an Azure Storage container.
    AzureBlob(Arc<AzureBlobStore>),
}

impl SnapshotStore {
    /// Reads the persisted snapshot bytes, `None` if nothing has been persisted yet.
    pub async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Self::Filesystem(store) => store.read().await,
            Self::AzureBlob(store) => store.read().await,
        }
    }

    /// Replaces the persisted snapshot bytes with `content`.
    pub async fn write(&self, content: &[u8]) -> Result<(), StoreError> {
        match self {
            Self::Filesystem(store) => store.write(content).await,
            Self::AzureBlob(store) => store.write(content).await,
        }
    }

    /// A short name of the backend, for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::AzureBlob(_) => "azblob",
        }
    }

    /// Where the snapshot is persisted, without any credentials.
    pub fn describe(&self) -> String {
        match self {
            Self::Filesystem(store) => store.path().display().to_string(),
            Self::AzureBlob(store) => store.blob_url().to_string(),
        }
    }
}

impl From<FilesystemStore> for SnapshotStore {
    fn from(store: FilesystemStore) -> Self {
        Self::Filesystem(store)
    }
}

impl From<AzureBlobStore> for SnapshotStore {
    fn from(store: AzureBlobStore) -> Self {
        Self::AzureBlob(Arc::new(store))
    }
}
