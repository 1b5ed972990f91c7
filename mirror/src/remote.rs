//! Remote tree enumeration and content streaming
//!
//! The only code in the engine that spawns operating system processes lives
//! here, behind the [`ContentSource`] trait. [`RcloneSource`] implements it by
//! shelling out to `rclone lsjson` and `rclone cat`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::path;

/// One entry of a recursive remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteEntry {
    /// Slash-separated path relative to the listed root
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes, only meaningful for files
    #[serde(default)]
    pub size: i64,
}

impl RemoteEntry {
    /// Build a file entry
    pub fn file(path: impl Into<String>, size: i64) -> Self {
        let path = path.into();
        Self {
            name: path::leaf_of(&path).to_string(),
            path,
            is_dir: false,
            size,
        }
    }

    /// Build a directory entry
    pub fn dir(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: path::leaf_of(&path).to_string(),
            path,
            is_dir: true,
            size: 0,
        }
    }

    /// Number of path segments
    pub fn depth(&self) -> usize {
        path::depth_of(&self.path)
    }

    /// Directory component of the path, `""` at the root
    pub fn parent_path(&self) -> &str {
        path::parent_of(&self.path)
    }

    /// Whether the entry sits directly under the listed root
    pub fn is_root_level(&self) -> bool {
        !self.path.contains('/')
    }

    /// False for files the backend cannot size, such as Google Docs
    pub fn has_known_size(&self) -> bool {
        self.is_dir || self.size != UNKNOWN_SIZE
    }

    /// Size in bytes with an unknown size counted as zero
    pub fn known_size(&self) -> u64 {
        self.size.max(0) as u64
    }
}

/// Remote profile and root passed explicitly through every call of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteContext {
    pub profile: String,
    pub root_path: String,
}

impl RemoteContext {
    /// Create a context, normalizing the profile name and root path
    pub fn new(profile: impl Into<String>, root_path: impl Into<String>) -> Self {
        let profile = profile.into();
        let root_path = root_path.into();
        Self {
            profile: profile.trim_end_matches(':').to_string(),
            root_path: root_path.trim_matches('/').to_string(),
        }
    }

    /// `profile:root`, the argument used for listing
    pub fn remote_target(&self) -> String {
        format!("{}:{}", self.profile, self.root_path)
    }

    /// `profile:root/relative`, the argument used for streaming one file
    pub fn remote_path(&self, relative: &str) -> String {
        format!("{}:{}", self.profile, path::join(&self.root_path, relative))
    }
}

/// Options for a listing call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub recursive: bool,
    pub dirs_only: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            dirs_only: false,
        }
    }
}

impl ListOptions {
    /// Recursive listing restricted to directories
    pub fn dirs_only() -> Self {
        Self {
            recursive: true,
            dirs_only: true,
        }
    }
}

type Completion = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// An open remote file: its bytes plus a handle on the producing process
pub struct RemoteContent {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    completion: Completion,
}

impl RemoteContent {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        completion: impl Future<Output = Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            completion: Box::pin(completion),
        }
    }

    /// Split into the byte stream and the completion future.
    ///
    /// The completion future must only be awaited once the stream has been
    /// drained; it resolves to the producer's success or failure.
    pub fn into_parts(self) -> (Box<dyn AsyncRead + Send + Unpin>, Completion) {
        (self.reader, self.completion)
    }
}

/// Source of remote listings and file contents
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// List entries under the context root
    async fn list(&self, ctx: &RemoteContext, options: ListOptions) -> Result<Vec<RemoteEntry>>;

    /// Open one file, `path` being relative to the context root
    async fn open(&self, ctx: &RemoteContext, path: &str) -> Result<RemoteContent>;
}

/// Parse the JSON array produced by the listing command.
///
/// Directory sizes are reported as `-1` by some backends and are normalized
/// to zero. Files keep [`UNKNOWN_SIZE`] so planning can tell them apart.
pub fn parse_listing(remote: &str, output: &[u8]) -> Result<Vec<RemoteEntry>> {
    let mut entries: Vec<RemoteEntry> = serde_json::from_slice(output).map_err(|e| {
        SyncError::enumeration_error(remote, format!("Unparsable listing output: {}", e))
    })?;

    for entry in &mut entries {
        if entry.is_dir {
            entry.size = 0;
        }
    }

    Ok(entries)
}

/// Size reported by the listing command when it cannot know a file's size
pub const UNKNOWN_SIZE: i64 = -1;

/// [`ContentSource`] backed by the rclone command-line tool
#[derive(Debug, Clone)]
pub struct RcloneSource {
    binary: PathBuf,
    config_file: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl Default for RcloneSource {
    fn default() -> Self {
        Self::new("rclone")
    }
}

impl RcloneSource {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_file: None,
            extra_args: Vec::new(),
        }
    }

    /// Use a specific rclone config file instead of rclone's default
    pub fn with_config_file(mut self, config_file: impl Into<PathBuf>) -> Self {
        self.config_file = Some(config_file.into());
        self
    }

    /// Arguments appended to every invocation
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg(subcommand);
        if let Some(config_file) = &self.config_file {
            command.arg("--config").arg(config_file);
        }
        command.args(&self.extra_args);
        command.stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl ContentSource for RcloneSource {
    async fn list(&self, ctx: &RemoteContext, options: ListOptions) -> Result<Vec<RemoteEntry>> {
        let remote = ctx.remote_target();
        let mut command = self.command("lsjson");
        command.arg(&remote);
        if options.recursive {
            command.arg("--recursive");
        }
        if options.dirs_only {
            command.arg("--dirs-only");
        }

        debug!(remote = %remote, ?options, "Running remote listing");
        let output = command.output().await.map_err(|e| {
            SyncError::enumeration_error(&remote, format!("Failed to run {}: {}", self.binary.display(), e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::enumeration_error(
                &remote,
                format!("listing exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        parse_listing(&remote, &output.stdout)
    }

    async fn open(&self, ctx: &RemoteContext, path: &str) -> Result<RemoteContent> {
        let remote = ctx.remote_path(path);
        let mut command = self.command("cat");
        command
            .arg(&remote)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            SyncError::stream_error(path, format!("Failed to run {}: {}", self.binary.display(), e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::stream_error(path, "stream process has no stdout"))?;
        let stderr = child.stderr.take();

        // Drain stderr concurrently so a chatty process cannot block on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        });

        let path = path.to_string();
        let completion = async move {
            let status = child
                .wait()
                .await
                .map_err(|e| SyncError::stream_error(&path, format!("Failed to await stream process: {}", e)))?;
            let stderr = stderr_task.await.unwrap_or_default();

            if status.success() {
                Ok(())
            } else {
                Err(SyncError::stream_error(
                    &path,
                    format!("stream exited with {}: {}", status, stderr.trim()),
                ))
            }
        };

        Ok(RemoteContent::new(stdout, completion))
    }
}

/// Lists the remote tree for a run
pub struct RemoteTreeEnumerator {
    source: Arc<dyn ContentSource>,
}

impl RemoteTreeEnumerator {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        Self { source }
    }

    /// Recursively list every folder and file under the context root
    pub async fn enumerate(&self, ctx: &RemoteContext) -> Result<Vec<RemoteEntry>> {
        self.enumerate_with(ctx, ListOptions::default()).await
    }

    /// Recursively list only the folder topology under the context root
    pub async fn enumerate_dirs(&self, ctx: &RemoteContext) -> Result<Vec<RemoteEntry>> {
        self.enumerate_with(ctx, ListOptions::dirs_only()).await
    }

    async fn enumerate_with(&self, ctx: &RemoteContext, options: ListOptions) -> Result<Vec<RemoteEntry>> {
        let start = Instant::now();
        let entries = self.source.list(ctx, options).await?;

        let folders = entries.iter().filter(|entry| entry.is_dir).count();
        info!(
            remote = %ctx.remote_target(),
            entries = entries.len(),
            folders,
            files = entries.len() - folders,
            dirs_only = options.dirs_only,
            duration_ms = start.elapsed().as_millis() as u64,
            "Remote tree enumerated"
        );

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let output = br#"[
            {"Path":"docs","Name":"docs","Size":-1,"MimeType":"inode/directory","ModTime":"2024-01-01T00:00:00Z","IsDir":true},
            {"Path":"docs/b.txt","Name":"b.txt","Size":2048,"MimeType":"text/plain","ModTime":"2024-01-01T00:00:00Z","IsDir":false}
        ]"#;

        let entries = parse_listing("gdrive:", output).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], RemoteEntry::dir("docs"));
        assert_eq!(entries[1], RemoteEntry::file("docs/b.txt", 2048));
    }

    #[test]
    fn test_parse_listing_keeps_unknown_file_size() {
        let output = br#"[
            {"Path":"Notes.gdoc","Name":"Notes.gdoc","Size":-1,"IsDir":false},
            {"Path":"docs","Name":"docs","Size":-1,"IsDir":true}
        ]"#;

        let entries = parse_listing("gdrive:", output).unwrap();
        assert_eq!(entries[0].size, UNKNOWN_SIZE);
        assert!(!entries[0].has_known_size());
        assert_eq!(entries[0].known_size(), 0);
        assert_eq!(entries[1].size, 0);
        assert!(entries[1].has_known_size());
    }

    #[test]
    fn test_parse_listing_rejects_garbage() {
        let err = parse_listing("gdrive:", b"Failed to create file system").unwrap_err();
        assert!(matches!(err, SyncError::Enumeration { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_listing("gdrive:", b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_remote_context_targets() {
        let ctx = RemoteContext::new("dropbox-alice:", "/Shared/Team/");
        assert_eq!(ctx.remote_target(), "dropbox-alice:Shared/Team");
        assert_eq!(ctx.remote_path("docs/b.txt"), "dropbox-alice:Shared/Team/docs/b.txt");

        let top = RemoteContext::new("gdrive", "");
        assert_eq!(top.remote_target(), "gdrive:");
        assert_eq!(top.remote_path("a.txt"), "gdrive:a.txt");
    }

    #[test]
    fn test_entry_helpers() {
        let entry = RemoteEntry::file("docs/sub/c.txt", 4096);
        assert_eq!(entry.name, "c.txt");
        assert_eq!(entry.depth(), 3);
        assert_eq!(entry.parent_path(), "docs/sub");
        assert!(!entry.is_root_level());
        assert!(RemoteEntry::file("a.txt", 1).is_root_level());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rclone_missing_binary_is_enumeration_error() {
        let source = RcloneSource::new("/nonexistent/rclone-binary");
        let ctx = RemoteContext::new("gdrive", "");
        let err = source.list(&ctx, ListOptions::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Enumeration { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_reports_nonzero_exit_after_drain() {
        // `false` ignores its arguments and exits 1 without output
        let source = RcloneSource::new("false");
        let ctx = RemoteContext::new("gdrive", "");
        let content = source.open(&ctx, "a.txt").await.unwrap();
        let (mut reader, completion) = content.into_parts();

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        let err = completion.await.unwrap_err();
        assert!(matches!(err, SyncError::StreamTransfer { .. }));
    }
}
