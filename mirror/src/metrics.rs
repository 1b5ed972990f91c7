//! Metrics and statistics for mirror runs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::SyncError;
use crate::materializer::MaterializeReport;
use crate::planner::PlanSummary;
use crate::transfer::TransferOutcome;

/// Phases of a mirror run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Enumeration,
    Planning,
    Materialization,
    Transfer,
}

/// Time spent in each phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDurations {
    pub enumeration: Duration,
    pub planning: Duration,
    pub materialization: Duration,
    pub transfer: Duration,
}

/// Counts and timings for one mirror run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Unique session identifier
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Total duration of the run
    pub duration: Duration,
    pub phases: PhaseDurations,
    /// Entries returned by the remote listing, after filtering
    pub remote_entries: usize,
    pub folders_planned: usize,
    pub files_planned: usize,
    pub bytes_planned: u64,
    pub folders_created: usize,
    pub folders_reused: usize,
    pub folders_failed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,
    pub bytes_transferred: u64,
    /// Errors tallied by kind, including the fatal one if the run aborted
    pub errors_by_kind: BTreeMap<String, usize>,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    /// Start metrics for a new run
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            duration: Duration::default(),
            phases: PhaseDurations::default(),
            remote_entries: 0,
            folders_planned: 0,
            files_planned: 0,
            bytes_planned: 0,
            folders_created: 0,
            folders_reused: 0,
            folders_failed: 0,
            files_succeeded: 0,
            files_failed: 0,
            files_cancelled: 0,
            bytes_transferred: 0,
            errors_by_kind: BTreeMap::new(),
        }
    }

    pub fn record_phase(&mut self, phase: Phase, duration: Duration) {
        let slot = match phase {
            Phase::Enumeration => &mut self.phases.enumeration,
            Phase::Planning => &mut self.phases.planning,
            Phase::Materialization => &mut self.phases.materialization,
            Phase::Transfer => &mut self.phases.transfer,
        };
        *slot += duration;
    }

    pub fn record_plan(&mut self, remote_entries: usize, summary: &PlanSummary) {
        self.remote_entries = remote_entries;
        self.folders_planned = summary.folders_to_create;
        self.files_planned = summary.files_to_sync;
        self.bytes_planned = summary.bytes_to_transfer;
    }

    pub fn record_materialization(&mut self, report: &MaterializeReport) {
        self.folders_created = report.created.len();
        self.folders_reused = report.reused.len();
        self.folders_failed = report.failures.len();
        if !report.failures.is_empty() {
            *self.errors_by_kind.entry("folder_creation".to_string()).or_default() += report.failures.len();
        }
    }

    pub fn record_transfer(&mut self, outcome: &TransferOutcome) {
        self.files_succeeded = outcome.succeeded_count;
        self.files_failed = outcome.failed_count;
        self.files_cancelled = outcome.cancelled_count;
        self.bytes_transferred = outcome.bytes_transferred;
        for (kind, count) in &outcome.failures_by_kind {
            *self.errors_by_kind.entry(kind.clone()).or_default() += count;
        }
    }

    /// Record the error that aborted the run
    pub fn record_error(&mut self, error: &SyncError) {
        *self.errors_by_kind.entry(error.kind().to_string()).or_default() += 1;
    }

    /// Mark the run as finished and log a summary
    pub fn complete(&mut self) {
        let finished_at = Utc::now();
        self.duration = (finished_at - self.started_at).to_std().unwrap_or_default();
        self.finished_at = Some(finished_at);

        info!(
            session_id = %self.session_id,
            duration_secs = self.duration.as_secs_f64(),
            enumeration_ms = self.phases.enumeration.as_millis() as u64,
            planning_ms = self.phases.planning.as_millis() as u64,
            materialization_ms = self.phases.materialization.as_millis() as u64,
            transfer_ms = self.phases.transfer.as_millis() as u64,
            folders_created = self.folders_created,
            folders_failed = self.folders_failed,
            files_succeeded = self.files_succeeded,
            files_failed = self.files_failed,
            files_cancelled = self.files_cancelled,
            bytes_transferred = self.bytes_transferred,
            transfer_rate_mbps = self.transfer_rate() / (1024.0 * 1024.0),
            success_rate = self.success_rate(),
            "Mirror run completed"
        );
    }

    /// Bytes per second over the transfer phase
    pub fn transfer_rate(&self) -> f64 {
        let secs = self.phases.transfer.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }

    /// Get success rate of attempted files as a percentage
    pub fn success_rate(&self) -> f64 {
        let attempted = self.files_succeeded + self.files_failed;
        if attempted == 0 {
            100.0
        } else {
            (self.files_succeeded as f64 / attempted as f64) * 100.0
        }
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        format!(
            "Run {} took {:.2}s: {} folders created, {} files transferred ({} failed, {} cancelled), {} bytes",
            self.session_id,
            self.duration.as_secs_f64(),
            self.folders_created,
            self.files_succeeded,
            self.files_failed,
            self.files_cancelled,
            self.bytes_transferred
        )
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
