//! In-memory destination store and scripted content source for tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError, SyncError};
use crate::remote::{ContentSource, ListOptions, RemoteContent, RemoteContext, RemoteEntry};
use crate::store::{
    BlobBody, BlobMeta, DestinationEntry, DestinationListing, DestinationStore, StoreResult,
    VersionedEntry,
};

#[derive(Debug, Clone)]
struct Node {
    parent: Option<String>,
    name: String,
    is_dir: bool,
    size: i64,
    blob: Option<String>,
    content_type: Option<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    nodes: HashMap<String, Node>,
    blobs: HashMap<String, Vec<u8>>,
    next_id: usize,
    create_log: Vec<(String, String)>,
    failing_creates: HashSet<String>,
    phantom_conflicts: HashSet<String>,
    failing_blobs: HashSet<String>,
    browse_calls: usize,
}

impl StoreState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn aggregate_size(&self, id: &str) -> i64 {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == Some(id))
            .map(|(child_id, node)| {
                if node.is_dir {
                    self.aggregate_size(child_id)
                } else {
                    node.size
                }
            })
            .sum()
    }

    fn path_of(&self, id: &str) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id.to_string());
        while let Some(node_id) = current {
            match self.nodes.get(&node_id) {
                Some(node) if node.parent.is_some() => {
                    segments.push(node.name.clone());
                    current = node.parent.clone();
                }
                _ => break,
            }
        }
        segments.reverse();
        segments.join("/")
    }
}

/// Destination store that keeps its tree in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            state.nodes.insert(
                "root".to_string(),
                Node {
                    parent: None,
                    name: String::new(),
                    is_dir: true,
                    size: 0,
                    blob: None,
                    content_type: None,
                },
            );
        }
        store
    }

    pub fn root_id(&self) -> String {
        "root".to_string()
    }

    /// Seed a folder; `size` is ignored since folder sizes are aggregated
    pub fn add_folder(&self, parent: &str, name: &str, _size: i64) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate("folder");
        state.nodes.insert(
            id.clone(),
            Node {
                parent: Some(parent.to_string()),
                name: name.to_string(),
                is_dir: true,
                size: 0,
                blob: None,
                content_type: None,
            },
        );
        id
    }

    pub fn add_file(&self, parent: &str, name: &str, size: i64) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate("file");
        state.nodes.insert(
            id.clone(),
            Node {
                parent: Some(parent.to_string()),
                name: name.to_string(),
                is_dir: false,
                size,
                blob: None,
                content_type: None,
            },
        );
        id
    }

    /// Make folder creation fail with a backend error for `name`
    pub fn fail_create(&self, name: &str) {
        self.state.lock().unwrap().failing_creates.insert(name.to_string());
    }

    /// Report `name` as existing on create without it being browsable
    pub fn phantom_conflict(&self, name: &str) {
        self.state.lock().unwrap().phantom_conflicts.insert(name.to_string());
    }

    /// Make blob uploads fail for `filename`
    pub fn fail_blob(&self, filename: &str) {
        self.state.lock().unwrap().failing_blobs.insert(filename.to_string());
    }

    pub fn parent_of(&self, id: &str) -> Option<String> {
        self.state.lock().unwrap().nodes.get(id).and_then(|node| node.parent.clone())
    }

    /// Folder paths in the order their creation was requested
    pub fn create_log(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .create_log
            .iter()
            .map(|(parent, name)| {
                let parent_path = state.path_of(parent);
                crate::path::join(&parent_path, name)
            })
            .collect()
    }

    pub fn browse_calls(&self) -> usize {
        self.state.lock().unwrap().browse_calls
    }

    /// Every node below the root as `path -> (is_dir, size)`
    pub fn tree(&self) -> BTreeMap<String, (bool, i64)> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_some())
            .map(|(id, node)| (state.path_of(id), (node.is_dir, node.size)))
            .collect()
    }

    /// Content and content type stored for the file at `path`
    pub fn file_at(&self, path: &str) -> Option<(Vec<u8>, String)> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .find(|(id, node)| !node.is_dir && state.path_of(id) == path)
            .and_then(|(_, node)| {
                let blob = node.blob.as_ref()?;
                Some((
                    state.blobs.get(blob).cloned().unwrap_or_default(),
                    node.content_type.clone().unwrap_or_default(),
                ))
            })
    }

    pub fn blob_count(&self) -> usize {
        self.state.lock().unwrap().blobs.len()
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn browse_children(&self, parent_id: &str) -> StoreResult<DestinationListing> {
        let mut state = self.state.lock().unwrap();
        state.browse_calls += 1;
        if !state.nodes.contains_key(parent_id) {
            return Err(StoreError::NotFound(parent_id.to_string()));
        }

        let mut listing = DestinationListing::default();
        for (id, node) in state.nodes.iter().filter(|(_, node)| node.parent.as_deref() == Some(parent_id)) {
            let entry = DestinationEntry {
                name: node.name.clone(),
                destination_id: id.clone(),
                is_directory: node.is_dir,
                size_bytes: if node.is_dir { state.aggregate_size(id) } else { node.size },
            };
            if node.is_dir {
                listing.folders.push(entry);
            } else {
                listing.files.push(entry);
            }
        }
        listing.folders.sort_by(|a, b| a.name.cmp(&b.name));
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    async fn create_entry(&self, parent_id: &str, name: &str, is_directory: bool) -> StoreResult<String> {
        let mut state = self.state.lock().unwrap();
        state.create_log.push((parent_id.to_string(), name.to_string()));

        if state.failing_creates.contains(name) {
            return Err(StoreError::Backend(format!("cannot create '{}'", name)));
        }
        if state.phantom_conflicts.contains(name) {
            return Err(StoreError::AlreadyExists { name: name.to_string() });
        }
        let exists = state.nodes.values().any(|node| {
            node.parent.as_deref() == Some(parent_id) && node.name == name && node.is_dir == is_directory
        });
        if exists {
            return Err(StoreError::AlreadyExists { name: name.to_string() });
        }

        let id = state.allocate(if is_directory { "folder" } else { "file" });
        state.nodes.insert(
            id.clone(),
            Node {
                parent: Some(parent_id.to_string()),
                name: name.to_string(),
                is_dir: is_directory,
                size: 0,
                blob: None,
                content_type: None,
            },
        );
        Ok(id)
    }

    async fn save_blob(&self, mut content: BlobBody, meta: BlobMeta) -> StoreResult<String> {
        let mut bytes = Vec::new();
        content
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut state = self.state.lock().unwrap();
        if state.failing_blobs.contains(&meta.filename) {
            return Err(StoreError::Backend(format!("blob storage rejected '{}'", meta.filename)));
        }
        let id = state.allocate("blob");
        state.blobs.insert(id.clone(), bytes);
        Ok(id)
    }

    async fn create_versioned_entry(&self, blob_id: &str, entry: VersionedEntry) -> StoreResult<String> {
        let mut state = self.state.lock().unwrap();
        if !state.blobs.contains_key(blob_id) {
            return Err(StoreError::NotFound(blob_id.to_string()));
        }
        let id = state.allocate("file");
        state.nodes.insert(
            id.clone(),
            Node {
                parent: Some(entry.parent_id),
                name: entry.name,
                is_dir: false,
                size: entry.size as i64,
                blob: Some(blob_id.to_string()),
                content_type: Some(entry.content_type),
            },
        );
        Ok(id)
    }
}

/// Content source that serves a fixed listing and in-memory contents
#[derive(Default)]
pub struct ScriptedSource {
    entries: Vec<RemoteEntry>,
    contents: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    list_error: Option<String>,
    cancel_on_open: Option<(String, CancellationToken)>,
    opened: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file whose content is `size` filler bytes
    pub fn with_file(mut self, path: &str, size: usize) -> Self {
        self.ensure_parents(path);
        self.entries.push(RemoteEntry::file(path, size as i64));
        self.contents.insert(path.to_string(), vec![b'x'; size]);
        self
    }

    pub fn with_content(mut self, path: &str, content: &[u8]) -> Self {
        self.ensure_parents(path);
        self.entries.push(RemoteEntry::file(path, content.len() as i64));
        self.contents.insert(path.to_string(), content.to_vec());
        self
    }

    /// Add a file whose listed size differs from what streaming yields
    pub fn with_misreported_file(mut self, path: &str, listed: i64, actual: usize) -> Self {
        self.ensure_parents(path);
        self.entries.push(RemoteEntry::file(path, listed));
        self.contents.insert(path.to_string(), vec![b'x'; actual]);
        self
    }

    pub fn with_dir(mut self, path: &str) -> Self {
        self.ensure_parents(path);
        if !self.entries.iter().any(|entry| entry.path == path) {
            self.entries.push(RemoteEntry::dir(path));
        }
        self
    }

    /// Make streaming `path` exit unsuccessfully
    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    pub fn with_list_error(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }

    /// Cancel `token` as soon as `path` is opened
    pub fn cancel_on_open(mut self, path: &str, token: CancellationToken) -> Self {
        self.cancel_on_open = Some((path.to_string(), token));
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn ensure_parents(&mut self, path: &str) {
        let parents: Vec<String> = crate::path::ancestors_of(path).map(str::to_string).collect();
        for parent in parents {
            if !self.entries.iter().any(|entry| entry.path == parent) {
                self.entries.push(RemoteEntry::dir(parent));
            }
        }
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn list(&self, ctx: &RemoteContext, options: ListOptions) -> Result<Vec<RemoteEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.list_error {
            return Err(SyncError::enumeration_error(ctx.remote_target(), message.clone()));
        }
        Ok(self
            .entries
            .iter()
            .filter(|entry| !options.dirs_only || entry.is_dir)
            .cloned()
            .collect())
    }

    async fn open(&self, _ctx: &RemoteContext, path: &str) -> Result<RemoteContent> {
        self.opened.lock().unwrap().push(path.to_string());
        if let Some((trigger, token)) = &self.cancel_on_open {
            if trigger == path {
                token.cancel();
            }
        }

        let content = self
            .contents
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::stream_error(path, "object not found"))?;
        let fails = self.failing.contains(path);
        let path = path.to_string();

        Ok(RemoteContent::new(Cursor::new(content), async move {
            if fails {
                Err(SyncError::stream_error(path, "stream exited with exit status: 1"))
            } else {
                Ok(())
            }
        }))
    }
}
