//! Tree Mirror Library
//!
//! An async engine that mirrors a remote cloud storage tree into a
//! hierarchical document store:
//! - Remote tree enumeration through a command-line content source
//! - Size-tolerance diff planning against the destination root
//! - Parent-first folder materialization
//! - Batched, cancellable file streaming with per-file failure isolation
//! - Run metrics and structured reports

pub mod adapter;
pub mod content_type;
pub mod engine;
pub mod error;
pub mod filter;
pub mod materializer;
pub mod metrics;
pub mod path;
pub mod planner;
pub mod remote;
pub mod store;
pub mod transfer;

// Re-export main types and functions
pub use adapter::{FileTransfer, RetryPolicy, Retrying, StreamAdapter};
pub use engine::{EngineOptions, MirrorEngine, RunStatus, SyncReport};
pub use error::{Result, StoreError, SyncError};
pub use filter::{FilterOptions, RemoteFilter};
pub use materializer::{FolderFailure, FolderMap, FolderMaterializer, MaterializeReport};
pub use metrics::RunMetrics;
pub use planner::{DiffPlanner, PlanSummary, SyncPlan};
pub use remote::{ContentSource, ListOptions, RcloneSource, RemoteContent, RemoteContext, RemoteEntry};
pub use store::{BlobBody, BlobMeta, DestinationEntry, DestinationListing, DestinationStore, VersionedEntry};
pub use transfer::{PipelineOptions, TransferOutcome, TransferPipeline};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Mirror `ctx` into `root_parent_id` with default options and no cancellation
pub async fn mirror_remote(
    source: Arc<dyn ContentSource>,
    store: Arc<dyn DestinationStore>,
    ctx: &RemoteContext,
    root_parent_id: &str,
) -> Result<SyncReport> {
    let engine = MirrorEngine::new(source, store, EngineOptions::default())?;
    Ok(engine.run(ctx, root_parent_id, &CancellationToken::new()).await)
}

/// Compute what a run would do without writing anything
pub async fn plan_remote(
    source: Arc<dyn ContentSource>,
    store: Arc<dyn DestinationStore>,
    ctx: &RemoteContext,
    root_parent_id: &str,
) -> Result<SyncPlan> {
    let engine = MirrorEngine::new(source, store, EngineOptions::default())?;
    engine.preview(ctx, root_parent_id).await
}

// Test modules
#[cfg(test)]
pub(crate) mod test_support;
