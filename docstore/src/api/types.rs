use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tree_mirror::DestinationEntry;

/// A document tree entry as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub id: String,
    pub name: String,
    pub is_directory: bool,
    /// Aggregate size for directories, content size for files
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl From<EntryRecord> for DestinationEntry {
    fn from(record: EntryRecord) -> Self {
        DestinationEntry {
            name: record.name,
            destination_id: record.id,
            is_directory: record.is_directory,
            size_bytes: record.size,
        }
    }
}

/// Stored blob reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
    pub id: String,
}

/// List response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult<T> {
    pub page: u32,
    #[serde(rename = "perPage")]
    pub per_page: u32,
    #[serde(rename = "totalItems")]
    pub total_items: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    pub items: Vec<T>,
}

/// Query parameters for entry list requests
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListParams {
    pub parent: Option<String>,
    pub page: Option<u32>,
    #[serde(rename = "perPage")]
    pub per_page: Option<u32>,
    pub sort: Option<String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

/// Request body for creating a folder or an empty entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest<'a> {
    pub parent_id: &'a str,
    pub name: &'a str,
    pub is_directory: bool,
}

/// Request body for attaching a blob to the tree as a versioned entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedEntryRequest<'a> {
    pub parent_id: &'a str,
    pub name: &'a str,
    pub size: u64,
    pub content_type: &'a str,
}

/// Error response from the store
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    pub data: Option<HashMap<String, serde_json::Value>>,
}

/// Health check response
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub code: u16,
    pub message: String,
}
