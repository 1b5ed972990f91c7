//! Folder materializer: creates destination folders parent-first

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{Result, StoreError, SyncError};
use crate::path;
use crate::store::DestinationStore;

/// Mapping from remote folder path to destination id; `""` is the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMap {
    entries: HashMap<String, String>,
}

impl FolderMap {
    /// Create a map seeded with the destination root
    pub fn new(root_id: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(String::new(), root_id.into());
        Self { entries }
    }

    pub fn root_id(&self) -> &str {
        self.entries.get("").map(String::as_str).unwrap_or_default()
    }

    pub fn get(&self, folder: &str) -> Option<&str> {
        self.entries.get(folder).map(String::as_str)
    }

    fn insert(&mut self, folder: impl Into<String>, id: impl Into<String>) {
        self.entries.insert(folder.into(), id.into());
    }

    /// Destination id for the directory containing `entry_path`.
    ///
    /// Falls back to the root when the directory is empty or unknown.
    pub fn resolve_parent(&self, entry_path: &str) -> &str {
        self.get(path::parent_of(entry_path)).unwrap_or_else(|| self.root_id())
    }

    /// Number of folders mapped, not counting the root
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A folder that could not be created or located
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderFailure {
    pub path: String,
    pub cause: String,
}

/// Outcome of the materialization phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializeReport {
    pub folder_map: FolderMap,
    /// Folders newly created at the destination
    pub created: Vec<String>,
    /// Folders that already existed and were located by browsing their parent
    pub reused: Vec<String>,
    pub failures: Vec<FolderFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Created,
    Reused,
}

/// Creates the planned folders, shallowest level first
#[derive(Debug, Clone)]
pub struct FolderMaterializer {
    concurrency: usize,
}

impl Default for FolderMaterializer {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FolderMaterializer {
    /// `concurrency` bounds creations in flight within one depth level
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Create every folder in `folders` under `root_parent_id`.
    ///
    /// A level only starts once every folder of the previous level has been
    /// created, located or recorded as failed.
    pub async fn materialize(
        &self,
        store: &dyn DestinationStore,
        folders: &[String],
        root_parent_id: &str,
    ) -> MaterializeReport {
        let start = Instant::now();
        let mut folder_map = FolderMap::new(root_parent_id);
        let mut created = Vec::new();
        let mut reused = Vec::new();
        let mut failures = Vec::new();

        let mut levels: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for folder in folders {
            levels.entry(path::depth_of(folder)).or_default().push(folder.as_str());
        }

        for (depth, level) in levels {
            let results: Vec<(&str, String, Result<(String, Origin)>)> = stream::iter(level.into_iter().map(|folder| {
                let parent_id = folder_map.resolve_parent(folder).to_string();
                async move {
                    let result = Self::materialize_one(store, folder, &parent_id).await;
                    (folder, parent_id, result)
                }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

            debug!(depth, folders = results.len(), "Folder level settled");

            for (folder, parent_id, result) in results {
                match result {
                    Ok((id, origin)) => {
                        debug!(folder = %folder, id = %id, ?origin, "Folder materialized");
                        folder_map.insert(folder, id);
                        match origin {
                            Origin::Created => created.push(folder.to_string()),
                            Origin::Reused => reused.push(folder.to_string()),
                        }
                    }
                    Err(e) => {
                        error!(folder = %folder, error = %e, "Folder materialization failed");
                        // Descendants and files fall back to the parent
                        folder_map.insert(folder, parent_id);
                        failures.push(FolderFailure {
                            path: folder.to_string(),
                            cause: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            created = created.len(),
            reused = reused.len(),
            failed = failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Folders materialized"
        );

        MaterializeReport {
            folder_map,
            created,
            reused,
            failures,
        }
    }

    async fn materialize_one(
        store: &dyn DestinationStore,
        folder: &str,
        parent_id: &str,
    ) -> Result<(String, Origin)> {
        let name = path::leaf_of(folder);

        match store.create_entry(parent_id, name, true).await {
            Ok(id) => Ok((id, Origin::Created)),
            Err(StoreError::AlreadyExists { .. }) => {
                debug!(folder = %folder, "Folder already exists, locating it");
                let listing = store.browse_children(parent_id).await.map_err(|e| {
                    SyncError::folder_error(folder, format!("browsing parent after conflict failed: {}", e))
                })?;

                listing
                    .folder_named(name)
                    .map(|entry| (entry.destination_id.clone(), Origin::Reused))
                    .ok_or_else(|| {
                        SyncError::folder_error(folder, "reported as existing but not found under its parent")
                    })
            }
            Err(e) => Err(SyncError::folder_error(folder, e.to_string())),
        }
    }
}
