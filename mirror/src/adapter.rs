//! Remote content stream adapter
//!
//! Pipes one remote file from a [`ContentSource`] into a [`DestinationStore`]
//! blob and then records it as a versioned entry under its destination parent.
//! Bytes flow straight from the producing process into the blob write; nothing
//! is buffered whole in memory.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, warn};

use crate::content_type::content_type_for;
use crate::error::{Result, SyncError};
use crate::remote::{ContentSource, RemoteContext, RemoteEntry};
use crate::store::{BlobMeta, DestinationStore, VersionedEntry};

/// One file handed from the transfer pipeline to whatever moves its bytes
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Transfer `entry` under `parent_id`, returning the number of bytes written
    async fn transfer_file(&self, ctx: &RemoteContext, entry: &RemoteEntry, parent_id: &str) -> Result<u64>;
}

/// Reader that counts the bytes passing through and enforces a ceiling
struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
    limit: Option<u64>,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let read = (buf.filled().len() - before) as u64;
        let total = this.count.fetch_add(read, Ordering::Relaxed) + read;
        match this.limit {
            Some(limit) if total > limit => {
                // A failed read must leave the caller's buffer as it was
                buf.set_filled(before);
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("stream exceeded the {} byte limit", limit),
                )))
            }
            _ => Poll::Ready(Ok(())),
        }
    }
}

/// [`FileTransfer`] that streams remote content into the destination store
pub struct StreamAdapter {
    source: Arc<dyn ContentSource>,
    store: Arc<dyn DestinationStore>,
    max_file_size: Option<u64>,
}

impl StreamAdapter {
    pub fn new(source: Arc<dyn ContentSource>, store: Arc<dyn DestinationStore>) -> Self {
        Self {
            source,
            store,
            max_file_size: None,
        }
    }

    /// Refuse files larger than `limit` bytes
    pub fn with_max_file_size(mut self, limit: Option<u64>) -> Self {
        self.max_file_size = limit;
        self
    }

    /// Stream `remote_path` into a new entry under `destination_parent_id`
    pub async fn stream_to_destination(
        &self,
        ctx: &RemoteContext,
        entry: &RemoteEntry,
        destination_parent_id: &str,
    ) -> Result<u64> {
        let start = Instant::now();
        let listed_size = entry.known_size();

        if let Some(limit) = self.max_file_size {
            if listed_size > limit {
                return Err(SyncError::FileTooLarge {
                    path: entry.path.clone(),
                    size: listed_size,
                    limit,
                });
            }
        }

        let content = self.source.open(ctx, &entry.path).await?;
        let (reader, completion) = content.into_parts();
        let content_type = content_type_for(&entry.name);
        let count = Arc::new(AtomicU64::new(0));
        let body = CountingReader {
            inner: reader,
            count: Arc::clone(&count),
            limit: self.max_file_size,
        };

        let meta = BlobMeta {
            filename: entry.name.clone(),
            size: listed_size,
            content_type: content_type.to_string(),
        };

        let blob_id = match self.store.save_blob(Box::new(body), meta).await {
            Ok(blob_id) => blob_id,
            Err(e) => {
                // Dropping the completion kills the producer if it is still running
                drop(completion);
                let streamed = count.load(Ordering::Relaxed);
                if let Some(limit) = self.max_file_size.filter(|limit| streamed > *limit) {
                    return Err(SyncError::FileTooLarge {
                        path: entry.path.clone(),
                        size: streamed,
                        limit,
                    });
                }
                return Err(SyncError::destination_error(&entry.path, e));
            }
        };

        if let Err(e) = completion.await {
            warn!(path = %entry.path, blob_id = %blob_id, "Stream failed after blob was written, blob left orphaned");
            return Err(e);
        }

        let bytes = count.load(Ordering::Relaxed);
        if bytes != listed_size {
            debug!(path = %entry.path, listed = listed_size, streamed = bytes, "Streamed size differs from listing");
        }

        let version = VersionedEntry {
            parent_id: destination_parent_id.to_string(),
            name: entry.name.clone(),
            size: bytes,
            content_type: content_type.to_string(),
        };
        let destination_id = self
            .store
            .create_versioned_entry(&blob_id, version)
            .await
            .map_err(|e| SyncError::destination_error(&entry.path, e))?;

        debug!(
            path = %entry.path,
            destination_id = %destination_id,
            bytes,
            content_type,
            duration_ms = start.elapsed().as_millis() as u64,
            "File streamed to destination"
        );

        Ok(bytes)
    }
}

#[async_trait]
impl FileTransfer for StreamAdapter {
    async fn transfer_file(&self, ctx: &RemoteContext, entry: &RemoteEntry, parent_id: &str) -> Result<u64> {
        self.stream_to_destination(ctx, entry, parent_id).await
    }
}

/// Retry policy for whole per-file transfers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
        }
    }
}

/// Wraps a [`FileTransfer`] and repeats retryable failures with exponential backoff
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: FileTransfer> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: FileTransfer> FileTransfer for Retrying<T> {
    async fn transfer_file(&self, ctx: &RemoteContext, entry: &RemoteEntry, parent_id: &str) -> Result<u64> {
        let backoff = ExponentialBackoff {
            current_interval: self.policy.initial_interval,
            initial_interval: self.policy.initial_interval,
            max_interval: self.policy.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        let max_attempts = self.policy.max_attempts.max(1);
        let attempts = AtomicU32::new(0);
        let inner = &self.inner;
        let attempts_ref = &attempts;

        retry(backoff, || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            match inner.transfer_file(ctx, entry, parent_id).await {
                Ok(bytes) => Ok(bytes),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    warn!(path = %entry.path, attempt, error = %error, "Retryable transfer error");
                    Err(backoff::Error::transient(error))
                }
                Err(error) => {
                    debug!(path = %entry.path, attempt, "Giving up on transfer");
                    Err(backoff::Error::permanent(error))
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStore, ScriptedSource};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    fn ctx() -> RemoteContext {
        RemoteContext::new("gdrive", "")
    }

    fn adapter(source: ScriptedSource, store: &MemoryStore) -> StreamAdapter {
        StreamAdapter::new(Arc::new(source), Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_streams_content_into_versioned_entry() {
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = ScriptedSource::new().with_content("docs/report.PDF", b"%PDF-1.7");
        let entry = RemoteEntry::file("docs/report.PDF", 8);

        let bytes = adapter(source, &store).stream_to_destination(&ctx(), &entry, &root).await.unwrap();

        assert_eq!(bytes, 8);
        let (content, content_type) = store.file_at("report.PDF").unwrap();
        assert_eq!(content, b"%PDF-1.7");
        assert_eq!(content_type, "application/pdf");
    }

    #[tokio::test]
    async fn test_version_records_streamed_size() {
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = ScriptedSource::new().with_misreported_file("a.bin", 10, 25);
        let entry = RemoteEntry::file("a.bin", 10);

        let bytes = adapter(source, &store).stream_to_destination(&ctx(), &entry, &root).await.unwrap();

        assert_eq!(bytes, 25);
        assert_eq!(store.tree().get("a.bin"), Some(&(false, 25)));
    }

    #[tokio::test]
    async fn test_listed_size_above_limit_fails_before_opening() {
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = Arc::new(ScriptedSource::new().with_file("big.iso", 100));
        let adapter = StreamAdapter::new(source.clone(), Arc::new(store.clone())).with_max_file_size(Some(50));

        let err = adapter
            .stream_to_destination(&ctx(), &RemoteEntry::file("big.iso", 100), &root)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::FileTooLarge { size: 100, limit: 50, .. }));
        assert!(source.opened().is_empty());
    }

    #[tokio::test]
    async fn test_stream_overflowing_limit_is_aborted() {
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = ScriptedSource::new().with_misreported_file("lies.bin", 10, 500);
        let adapter = adapter(source, &store).with_max_file_size(Some(100));

        let err = adapter
            .stream_to_destination(&ctx(), &RemoteEntry::file("lies.bin", 10), &root)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::FileTooLarge { limit: 100, .. }));
        assert!(store.tree().is_empty());
    }

    #[tokio::test]
    async fn test_counting_reader_rejects_overflow_without_filling() {
        let count = Arc::new(AtomicU64::new(0));
        let mut reader = CountingReader {
            inner: &[7u8; 64][..],
            count: Arc::clone(&count),
            limit: Some(10),
        };

        let mut bytes = Vec::new();
        let err = reader.read_to_end(&mut bytes).await.unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(bytes.is_empty());
        assert!(count.load(Ordering::Relaxed) > 10);
    }

    #[tokio::test]
    async fn test_counting_reader_passes_data_under_limit() {
        let count = Arc::new(AtomicU64::new(0));
        let mut reader = CountingReader {
            inner: &b"hello"[..],
            count: Arc::clone(&count),
            limit: Some(5),
        };

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.unwrap();

        assert_eq!(bytes, b"hello");
        assert_eq!(count.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_failed_stream_creates_no_entry() {
        let store = MemoryStore::new();
        let root = store.root_id();
        let source = ScriptedSource::new().with_file("a.txt", 100).failing("a.txt");

        let err = adapter(source, &store)
            .stream_to_destination(&ctx(), &RemoteEntry::file("a.txt", 100), &root)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::StreamTransfer { .. }));
        assert!(store.tree().is_empty());
        assert_eq!(store.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_blob_rejection_is_destination_write() {
        let store = MemoryStore::new();
        let root = store.root_id();
        store.fail_blob("a.txt");
        let source = ScriptedSource::new().with_file("a.txt", 100);

        let err = adapter(source, &store)
            .stream_to_destination(&ctx(), &RemoteEntry::file("a.txt", 100), &root)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::DestinationWrite { .. }));
        assert!(err.is_retryable());
    }

    /// Fails with a scripted sequence of errors before succeeding
    struct Flaky {
        failures: Mutex<Vec<SyncError>>,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: Vec<SyncError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FileTransfer for Flaky {
        async fn transfer_file(&self, _ctx: &RemoteContext, entry: &RemoteEntry, _parent_id: &str) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().unwrap().pop() {
                Some(error) => Err(error),
                None => Ok(entry.size as u64),
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_retrying_recovers_from_transient_failures() {
        let flaky = Flaky::new(vec![
            SyncError::stream_error("a.txt", "exit status 3"),
            SyncError::stream_error("a.txt", "exit status 3"),
        ]);
        let retrying = Retrying::new(flaky, fast_policy(3));

        let bytes = retrying
            .transfer_file(&ctx(), &RemoteEntry::file("a.txt", 42), "root")
            .await
            .unwrap();

        assert_eq!(bytes, 42);
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retrying_stops_at_max_attempts() {
        let flaky = Flaky::new(vec![
            SyncError::stream_error("a.txt", "third"),
            SyncError::stream_error("a.txt", "second"),
            SyncError::stream_error("a.txt", "first"),
        ]);
        let retrying = Retrying::new(flaky, fast_policy(2));

        let err = retrying
            .transfer_file(&ctx(), &RemoteEntry::file("a.txt", 42), "root")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("second"));
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retrying_skips_permanent_errors() {
        let flaky = Flaky::new(vec![SyncError::FileTooLarge {
            path: "a.txt".into(),
            size: 10,
            limit: 5,
        }]);
        let retrying = Retrying::new(flaky, fast_policy(5));

        let err = retrying
            .transfer_file(&ctx(), &RemoteEntry::file("a.txt", 10), "root")
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::FileTooLarge { .. }));
        assert_eq!(retrying.inner.calls.load(Ordering::SeqCst), 1);
    }
}
