//! File transfer pipeline: batched, concurrent, cancellable

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::FileTransfer;
use crate::materializer::FolderMap;
use crate::remote::{RemoteContext, RemoteEntry};

/// Default number of files transferred concurrently in one batch
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Default pause between two batches
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

/// Number of most recent failures kept in a [`TransferOutcome`]
pub const MAX_RECORDED_ERRORS: usize = 20;

/// Pipeline options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

/// A file that failed to transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailure {
    pub path: String,
    pub cause: String,
}

/// Tally of one pipeline run, aggregated across batches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub attempted_count: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    /// Files never started because the run was cancelled
    pub cancelled_count: usize,
    pub bytes_transferred: u64,
    /// Most recent failures, oldest first
    pub last_errors: VecDeque<TransferFailure>,
    /// Failures tallied by error kind
    pub failures_by_kind: BTreeMap<String, usize>,
}

impl TransferOutcome {
    fn record_failure(&mut self, path: &str, kind: &str, cause: String) {
        self.failed_count += 1;
        *self.failures_by_kind.entry(kind.to_string()).or_default() += 1;
        if self.last_errors.len() == MAX_RECORDED_ERRORS {
            self.last_errors.pop_front();
        }
        self.last_errors.push_back(TransferFailure {
            path: path.to_string(),
            cause,
        });
    }

    /// Whether every attempted file succeeded and nothing was cancelled
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0 && self.cancelled_count == 0
    }
}

/// Drives per-file transfers in fixed-size batches
pub struct TransferPipeline {
    transfer: Arc<dyn FileTransfer>,
    options: PipelineOptions,
}

impl TransferPipeline {
    pub fn new(transfer: Arc<dyn FileTransfer>, options: PipelineOptions) -> Self {
        Self { transfer, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Transfer `files`, resolving each destination parent through `folder_map`.
    ///
    /// Batches run in order. Files within a batch run concurrently and fail
    /// independently. Cancellation is honored between batches; an in-flight
    /// batch always settles.
    pub async fn transfer(
        &self,
        ctx: &RemoteContext,
        files: &[RemoteEntry],
        folder_map: &FolderMap,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let start = Instant::now();
        let batch_size = self.options.batch_size.max(1);
        let mut outcome = TransferOutcome::default();

        for (index, batch) in files.chunks(batch_size).enumerate() {
            if index > 0 && !self.options.batch_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.options.batch_delay) => {}
                }
            }

            if cancel.is_cancelled() {
                outcome.cancelled_count = files.len() - index * batch_size;
                warn!(
                    remaining = outcome.cancelled_count,
                    completed = outcome.attempted_count,
                    "Transfer cancelled, skipping remaining files"
                );
                break;
            }

            debug!(batch = index, files = batch.len(), "Starting transfer batch");
            let results = join_all(batch.iter().map(|entry| {
                let parent_id = folder_map.resolve_parent(&entry.path);
                async move { (entry, self.transfer.transfer_file(ctx, entry, parent_id).await) }
            }))
            .await;

            for (entry, result) in results {
                outcome.attempted_count += 1;
                match result {
                    Ok(bytes) => {
                        outcome.succeeded_count += 1;
                        outcome.bytes_transferred += bytes;
                    }
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "File transfer failed");
                        outcome.record_failure(&entry.path, e.kind(), e.to_string());
                    }
                }
            }
        }

        info!(
            attempted = outcome.attempted_count,
            succeeded = outcome.succeeded_count,
            failed = outcome.failed_count,
            cancelled = outcome.cancelled_count,
            bytes = outcome.bytes_transferred,
            duration_ms = start.elapsed().as_millis() as u64,
            "File transfer finished"
        );

        outcome
    }
}
