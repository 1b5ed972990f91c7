//! Mirror engine that orchestrates a synchronization run

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapter::{FileTransfer, RetryPolicy, Retrying, StreamAdapter};
use crate::error::{Result, SyncError};
use crate::filter::{FilterOptions, RemoteFilter};
use crate::materializer::{FolderFailure, FolderMaterializer};
use crate::metrics::{Phase, RunMetrics};
use crate::planner::{DiffPlanner, PlanSummary, SyncPlan, DEFAULT_TOLERANCE_KIB};
use crate::remote::{ContentSource, RemoteContext, RemoteEntry, RemoteTreeEnumerator};
use crate::store::DestinationStore;
use crate::transfer::{PipelineOptions, TransferOutcome, TransferPipeline, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE};

/// Options for mirror runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Size tolerance for equivalence, in kibibytes
    pub tolerance_kib: f64,
    /// Folder creations in flight within one depth level
    pub folder_concurrency: usize,
    /// Files transferred concurrently per batch
    pub batch_size: usize,
    /// Pause between transfer batches
    pub batch_delay: Duration,
    /// Refuse files above this many bytes
    pub max_file_size: Option<u64>,
    /// Retry per-file transfers; `None` disables retries
    pub retry: Option<RetryPolicy>,
    /// Remote path filtering applied before planning
    pub filter: FilterOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tolerance_kib: DEFAULT_TOLERANCE_KIB,
            folder_concurrency: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            max_file_size: None,
            retry: None,
            filter: FilterOptions::default(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The destination already matched the remote
    NothingToSync,
    /// Every planned folder and file was mirrored
    Completed,
    /// The run finished but some folders or files failed
    CompletedWithFailures,
    /// A fatal error stopped the run before anything was written
    Aborted,
    /// The run was cancelled; files not yet started were skipped
    Cancelled,
}

/// Result of one mirror run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: bool,
    pub folders_created: usize,
    /// Files successfully transferred
    pub files_processed: usize,
    pub files_failed: usize,
    pub message: String,
    pub status: RunStatus,
    pub plan: Option<PlanSummary>,
    pub transfer: Option<TransferOutcome>,
    pub folder_failures: Vec<FolderFailure>,
    pub metrics: RunMetrics,
}

impl SyncReport {
    fn aborted(error: &SyncError, mut metrics: RunMetrics) -> Self {
        metrics.record_error(error);
        metrics.complete();
        Self {
            success: false,
            folders_created: 0,
            files_processed: 0,
            files_failed: 0,
            message: format!("Aborted: {}", error),
            status: RunStatus::Aborted,
            plan: None,
            transfer: None,
            folder_failures: Vec::new(),
            metrics,
        }
    }
}

/// Mirrors a remote tree into a destination store
pub struct MirrorEngine {
    store: Arc<dyn DestinationStore>,
    enumerator: RemoteTreeEnumerator,
    filter: RemoteFilter,
    planner: DiffPlanner,
    materializer: FolderMaterializer,
    pipeline: TransferPipeline,
}

impl MirrorEngine {
    /// Create an engine; fails only if the filter patterns do not compile
    pub fn new(
        source: Arc<dyn ContentSource>,
        store: Arc<dyn DestinationStore>,
        options: EngineOptions,
    ) -> Result<Self> {
        let adapter = StreamAdapter::new(Arc::clone(&source), Arc::clone(&store))
            .with_max_file_size(options.max_file_size);
        let transfer: Arc<dyn FileTransfer> = match options.retry.clone() {
            Some(policy) => Arc::new(Retrying::new(adapter, policy)),
            None => Arc::new(adapter),
        };

        Ok(Self {
            enumerator: RemoteTreeEnumerator::new(source),
            filter: RemoteFilter::new(options.filter.clone())?,
            planner: DiffPlanner::with_tolerance_kib(options.tolerance_kib),
            materializer: FolderMaterializer::new(options.folder_concurrency),
            pipeline: TransferPipeline::new(
                transfer,
                PipelineOptions {
                    batch_size: options.batch_size,
                    batch_delay: options.batch_delay,
                },
            ),
            store,
        })
    }

    /// List the remote tree, optionally folders only
    pub async fn list(&self, ctx: &RemoteContext, dirs_only: bool) -> Result<Vec<RemoteEntry>> {
        let entries = if dirs_only {
            self.enumerator.enumerate_dirs(ctx).await?
        } else {
            self.enumerator.enumerate(ctx).await?
        };
        Ok(self.filter.apply(entries))
    }

    /// Enumerate and plan without writing anything
    pub async fn preview(&self, ctx: &RemoteContext, root_parent_id: &str) -> Result<SyncPlan> {
        let entries = self.list(ctx, false).await?;
        self.planner
            .plan(self.store.as_ref(), &entries, root_parent_id, &ctx.remote_target())
            .await
    }

    /// Run enumeration, planning, folder materialization and file transfer.
    ///
    /// Never returns an error: fatal failures end up in the report as
    /// [`RunStatus::Aborted`].
    pub async fn run(&self, ctx: &RemoteContext, root_parent_id: &str, cancel: &CancellationToken) -> SyncReport {
        let mut metrics = RunMetrics::new();
        info!(
            session_id = %metrics.session_id,
            remote = %ctx.remote_target(),
            root = %root_parent_id,
            batch_size = self.pipeline.options().batch_size,
            tolerance_kib = self.planner.tolerance_kib(),
            "Starting mirror run"
        );

        let phase_start = Instant::now();
        let entries = match self.list(ctx, false).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(remote = %ctx.remote_target(), error = %e, "Enumeration failed, aborting run");
                return SyncReport::aborted(&e, metrics);
            }
        };
        metrics.record_phase(Phase::Enumeration, phase_start.elapsed());

        let phase_start = Instant::now();
        let plan = match self
            .planner
            .plan(self.store.as_ref(), &entries, root_parent_id, &ctx.remote_target())
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                error!(remote = %ctx.remote_target(), error = %e, "Planning failed, aborting run");
                return SyncReport::aborted(&e, metrics);
            }
        };
        metrics.record_phase(Phase::Planning, phase_start.elapsed());
        let summary = plan.summary();
        metrics.record_plan(entries.len(), &summary);

        if plan.is_empty() {
            metrics.complete();
            return SyncReport {
                success: true,
                folders_created: 0,
                files_processed: 0,
                files_failed: 0,
                message: "Nothing to sync".to_string(),
                status: RunStatus::NothingToSync,
                plan: Some(summary),
                transfer: None,
                folder_failures: Vec::new(),
                metrics,
            };
        }

        if cancel.is_cancelled() {
            warn!("Run cancelled before any folder was created");
            metrics.files_cancelled = plan.files_to_sync.len();
            metrics.complete();
            return SyncReport {
                success: false,
                folders_created: 0,
                files_processed: 0,
                files_failed: 0,
                message: format!("Cancelled before start, {} files not transferred", plan.files_to_sync.len()),
                status: RunStatus::Cancelled,
                plan: Some(summary),
                transfer: None,
                folder_failures: Vec::new(),
                metrics,
            };
        }

        let phase_start = Instant::now();
        let materialized = self
            .materializer
            .materialize(self.store.as_ref(), &plan.folders_to_create, root_parent_id)
            .await;
        metrics.record_phase(Phase::Materialization, phase_start.elapsed());
        metrics.record_materialization(&materialized);

        let phase_start = Instant::now();
        let outcome = self
            .pipeline
            .transfer(ctx, &plan.files_to_sync, &materialized.folder_map, cancel)
            .await;
        metrics.record_phase(Phase::Transfer, phase_start.elapsed());
        metrics.record_transfer(&outcome);
        metrics.complete();

        let folders_created = materialized.created.len();
        let folder_failures = materialized.failures;
        let (status, message) = if outcome.cancelled_count > 0 {
            (
                RunStatus::Cancelled,
                format!(
                    "Cancelled: {} files transferred, {} failed, {} not started",
                    outcome.succeeded_count, outcome.failed_count, outcome.cancelled_count
                ),
            )
        } else if !outcome.is_clean() || !folder_failures.is_empty() {
            (
                RunStatus::CompletedWithFailures,
                format!(
                    "Synced {} files into {} new folders; {} files and {} folders failed",
                    outcome.succeeded_count,
                    folders_created,
                    outcome.failed_count,
                    folder_failures.len()
                ),
            )
        } else {
            (
                RunStatus::Completed,
                format!("Synced {} files into {} new folders", outcome.succeeded_count, folders_created),
            )
        };

        SyncReport {
            success: status == RunStatus::Completed,
            folders_created,
            files_processed: outcome.succeeded_count,
            files_failed: outcome.failed_count,
            message,
            status,
            plan: Some(summary),
            transfer: Some(outcome),
            folder_failures,
            metrics,
        }
    }
}
