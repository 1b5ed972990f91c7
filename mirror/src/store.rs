//! Destination store seam
//!
//! The engine never talks to the document store directly. Everything it needs
//! from the store goes through [`DestinationStore`], which the `docstore` crate
//! implements over HTTP and the tests implement in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::StoreError;

/// Result type alias for destination store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Byte stream handed to [`DestinationStore::save_blob`]
pub type BlobBody = Box<dyn AsyncRead + Send + Unpin>;

/// A child of a destination parent as reported by a browse call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationEntry {
    pub name: String,
    pub destination_id: String,
    pub is_directory: bool,
    /// For folders this is the aggregate size of everything beneath them
    pub size_bytes: i64,
}

/// Immediate children of one destination parent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationListing {
    pub folders: Vec<DestinationEntry>,
    pub files: Vec<DestinationEntry>,
}

impl DestinationListing {
    /// Find a folder child by exact name
    pub fn folder_named(&self, name: &str) -> Option<&DestinationEntry> {
        self.folders.iter().find(|entry| entry.name == name)
    }

    /// Find a file child by exact name
    pub fn file_named(&self, name: &str) -> Option<&DestinationEntry> {
        self.files.iter().find(|entry| entry.name == name)
    }
}

/// Metadata accompanying a blob upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub filename: String,
    pub size: u64,
    pub content_type: String,
}

/// A document-tree entry that points at a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedEntry {
    pub parent_id: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// Operations the engine consumes from the destination document store
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// List the immediate folder and file children of `parent_id`
    async fn browse_children(&self, parent_id: &str) -> StoreResult<DestinationListing>;

    /// Create a folder or empty file entry under `parent_id`.
    ///
    /// Must fail with [`StoreError::AlreadyExists`] when the parent already
    /// holds a child with the same name and kind.
    async fn create_entry(&self, parent_id: &str, name: &str, is_directory: bool) -> StoreResult<String>;

    /// Store a new blob from a byte stream and return its id
    async fn save_blob(&self, content: BlobBody, meta: BlobMeta) -> StoreResult<String>;

    /// Create a tree entry referencing `blob_id` with a version record
    async fn create_versioned_entry(&self, blob_id: &str, entry: VersionedEntry) -> StoreResult<String>;
}
