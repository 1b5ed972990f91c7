//! Diff planner: decides which remote folders and files must be mirrored
//!
//! The planner compares a flat remote listing against the immediate children
//! of the destination root. Equivalence is a size heuristic: two items are
//! considered synchronized when their sizes agree within a tolerance measured
//! in kibibytes. Content and modification times are never inspected.

use std::collections::{BTreeSet, HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::path;
use crate::remote::RemoteEntry;
use crate::store::{DestinationListing, DestinationStore};

/// Default size tolerance, in kibibytes
pub const DEFAULT_TOLERANCE_KIB: f64 = 1.0;

/// Why a top-level folder or root file was or was not selected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No same-named item exists at the destination
    Missing,
    /// A same-named item exists but its size is outside the tolerance
    SizeDiffers,
    /// A same-named item exists with an equivalent size
    Matched,
    /// The remote cannot report the file's size, so it never matches
    SizeUnknown,
}

impl Decision {
    pub fn is_selected(self) -> bool {
        !matches!(self, Decision::Matched)
    }
}

/// Comparison of one remote item against the destination root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comparison {
    pub name: String,
    pub remote_kib: f64,
    pub destination_kib: Option<f64>,
    pub decision: Decision,
}

/// Destination item whose name looks like a collision-renamed copy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenamedCandidate {
    pub remote_name: String,
    pub destination_name: String,
    pub is_directory: bool,
}

/// Comparison summary recorded alongside a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanDiagnostics {
    pub remote_root: String,
    pub remote_folders: usize,
    pub remote_files: usize,
    /// Ancestor folders that were missing from the listing and synthesized
    pub implicit_folders: usize,
    pub destination_folders: usize,
    pub destination_files: usize,
    pub folder_comparisons: Vec<Comparison>,
    pub root_file_comparisons: Vec<Comparison>,
    /// Reported only; never used to select or skip anything
    pub renamed_candidates: Vec<RenamedCandidate>,
}

/// Summary counts of a sync plan
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSummary {
    pub folders_to_create: usize,
    pub files_to_sync: usize,
    pub bytes_to_transfer: u64,
    pub folders_matched: usize,
    pub root_files_matched: usize,
}

/// What a run must create and transfer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Folder paths, parents always before their children
    pub folders_to_create: Vec<String>,
    pub files_to_sync: Vec<RemoteEntry>,
    pub diagnostics: PlanDiagnostics,
}

impl SyncPlan {
    /// Whether the plan has nothing to do
    pub fn is_empty(&self) -> bool {
        self.folders_to_create.is_empty() && self.files_to_sync.is_empty()
    }

    /// Total bytes the plan will stream
    pub fn bytes_to_transfer(&self) -> u64 {
        self.files_to_sync
            .iter()
            .map(RemoteEntry::known_size)
            .sum()
    }

    /// Generate summary statistics for the plan
    pub fn summary(&self) -> PlanSummary {
        let matched = |comparisons: &[Comparison]| {
            comparisons
                .iter()
                .filter(|comparison| comparison.decision == Decision::Matched)
                .count()
        };

        PlanSummary {
            folders_to_create: self.folders_to_create.len(),
            files_to_sync: self.files_to_sync.len(),
            bytes_to_transfer: self.bytes_to_transfer(),
            folders_matched: matched(&self.diagnostics.folder_comparisons),
            root_files_matched: matched(&self.diagnostics.root_file_comparisons),
        }
    }
}

/// Whether two byte sizes are equivalent within `tolerance_kib` kibibytes
pub fn sizes_equivalent(a: i64, b: i64, tolerance_kib: f64) -> bool {
    (a.abs_diff(b) as f64 / 1024.0) <= tolerance_kib
}

fn to_kib(bytes: i64) -> f64 {
    bytes as f64 / 1024.0
}

/// Whether `candidate` looks like `name` renamed on collision (`name-2`, `stem-2.ext`)
pub fn is_suffix_renamed(name: &str, candidate: &str) -> bool {
    let numbered = |rest: &str| {
        rest.strip_prefix('-')
            .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    };

    if let Some(rest) = candidate.strip_prefix(name) {
        if numbered(rest) {
            return true;
        }
    }

    match name.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = name.split_at(dot);
            candidate
                .strip_suffix(ext)
                .and_then(|head| head.strip_prefix(stem))
                .map(numbered)
                .unwrap_or(false)
        }
        _ => false,
    }
}

/// Partitioned, validated remote listing
struct RemoteTree<'a> {
    folders: BTreeSet<String>,
    files: Vec<&'a RemoteEntry>,
    implicit_folders: usize,
}

/// Diff planner for generating sync plans
#[derive(Debug, Clone)]
pub struct DiffPlanner {
    tolerance_kib: f64,
}

impl Default for DiffPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffPlanner {
    /// Create a planner with the default tolerance
    pub fn new() -> Self {
        Self {
            tolerance_kib: DEFAULT_TOLERANCE_KIB,
        }
    }

    /// Create a planner with a custom tolerance in kibibytes
    pub fn with_tolerance_kib(tolerance_kib: f64) -> Self {
        Self {
            tolerance_kib: tolerance_kib.max(0.0),
        }
    }

    pub fn tolerance_kib(&self) -> f64 {
        self.tolerance_kib
    }

    /// Browse the destination root once and plan against it
    pub async fn plan(
        &self,
        store: &dyn DestinationStore,
        remote_entries: &[RemoteEntry],
        destination_root_id: &str,
        remote_root: &str,
    ) -> Result<SyncPlan> {
        let listing = store.browse_children(destination_root_id).await?;
        self.plan_against(remote_entries, &listing, remote_root)
    }

    /// Plan against an already fetched snapshot of the destination root
    pub fn plan_against(
        &self,
        remote_entries: &[RemoteEntry],
        destination: &DestinationListing,
        remote_root: &str,
    ) -> Result<SyncPlan> {
        let tree = Self::partition(remote_entries)?;

        // Aggregate file sizes into every folder above them
        let mut folder_sizes: HashMap<&str, i64> = HashMap::new();
        for file in &tree.files {
            for ancestor in path::ancestors_of(&file.path) {
                *folder_sizes.entry(ancestor).or_insert(0) += file.known_size() as i64;
            }
        }

        let mut diagnostics = PlanDiagnostics {
            remote_root: remote_root.to_string(),
            remote_folders: tree.folders.len(),
            remote_files: tree.files.len(),
            implicit_folders: tree.implicit_folders,
            destination_folders: destination.folders.len(),
            destination_files: destination.files.len(),
            ..Default::default()
        };

        // Folder rule, evaluated for folders directly under the root
        let mut selected_top_level: HashSet<&str> = HashSet::new();
        for folder in tree.folders.iter().filter(|folder| !folder.contains('/')) {
            let remote_size = folder_sizes.get(folder.as_str()).copied().unwrap_or(0);
            let existing = destination.folder_named(folder);
            let comparison = self.compare(folder, remote_size, existing.map(|entry| entry.size_bytes));

            debug!(
                folder = %folder,
                remote_kib = comparison.remote_kib,
                destination_kib = ?comparison.destination_kib,
                decision = ?comparison.decision,
                "Compared folder"
            );

            if comparison.decision.is_selected() {
                selected_top_level.insert(folder.as_str());
                if existing.is_none() {
                    diagnostics.renamed_candidates.extend(
                        Self::renamed_candidates(folder, &destination.folders, true),
                    );
                }
            }
            diagnostics.folder_comparisons.push(comparison);
        }

        // Root file rule, and nested files follow their top-level folder
        let mut files_to_sync: Vec<RemoteEntry> = Vec::new();
        for file in &tree.files {
            if file.is_root_level() {
                let existing = destination.file_named(&file.name);
                let comparison = if file.has_known_size() {
                    self.compare(&file.name, file.size, existing.map(|entry| entry.size_bytes))
                } else {
                    Comparison {
                        name: file.name.clone(),
                        remote_kib: 0.0,
                        destination_kib: existing.map(|entry| to_kib(entry.size_bytes)),
                        decision: Decision::SizeUnknown,
                    }
                };

                if comparison.decision.is_selected() {
                    files_to_sync.push((*file).clone());
                    if existing.is_none() {
                        diagnostics.renamed_candidates.extend(
                            Self::renamed_candidates(&file.name, &destination.files, false),
                        );
                    }
                }
                diagnostics.root_file_comparisons.push(comparison);
            } else if selected_top_level.contains(path::top_level_of(&file.path)) {
                files_to_sync.push((*file).clone());
            }
        }
        files_to_sync.sort_by(|a, b| a.path.cmp(&b.path));

        // Selected folders and their ancestors, shallowest first
        let mut folders_to_create: Vec<String> = tree
            .folders
            .iter()
            .filter(|folder| selected_top_level.contains(path::top_level_of(folder)))
            .cloned()
            .collect();
        folders_to_create.sort_by(|a, b| {
            path::depth_of(a)
                .cmp(&path::depth_of(b))
                .then_with(|| a.cmp(b))
        });

        let plan = SyncPlan {
            folders_to_create,
            files_to_sync,
            diagnostics,
        };

        let summary = plan.summary();
        info!(
            remote_root = %remote_root,
            folders_to_create = summary.folders_to_create,
            files_to_sync = summary.files_to_sync,
            bytes_to_transfer = summary.bytes_to_transfer,
            folders_matched = summary.folders_matched,
            root_files_matched = summary.root_files_matched,
            renamed_candidates = plan.diagnostics.renamed_candidates.len(),
            "Sync plan generated"
        );

        Ok(plan)
    }

    /// Apply the selection rule to one remote item
    fn compare(&self, name: &str, remote_size: i64, destination_size: Option<i64>) -> Comparison {
        let decision = match destination_size {
            None => Decision::Missing,
            Some(size) if sizes_equivalent(remote_size, size, self.tolerance_kib) => Decision::Matched,
            Some(_) => Decision::SizeDiffers,
        };

        Comparison {
            name: name.to_string(),
            remote_kib: to_kib(remote_size),
            destination_kib: destination_size.map(to_kib),
            decision,
        }
    }

    fn renamed_candidates(
        name: &str,
        destination: &[crate::store::DestinationEntry],
        is_directory: bool,
    ) -> Vec<RenamedCandidate> {
        destination
            .iter()
            .filter(|entry| is_suffix_renamed(name, &entry.name))
            .map(|entry| RenamedCandidate {
                remote_name: name.to_string(),
                destination_name: entry.name.clone(),
                is_directory,
            })
            .collect()
    }

    /// Validate the listing and split it into folders and files
    fn partition(remote_entries: &[RemoteEntry]) -> Result<RemoteTree<'_>> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(remote_entries.len());
        let mut folders: BTreeSet<String> = BTreeSet::new();
        let mut files: Vec<&RemoteEntry> = Vec::new();

        for entry in remote_entries {
            if let Some(problem) = path::validate(&entry.path) {
                return Err(SyncError::planning_error(format!(
                    "Malformed remote path '{}': {}",
                    entry.path, problem
                )));
            }
            if !seen.insert(entry.path.as_str()) {
                return Err(SyncError::planning_error(format!(
                    "Remote path '{}' is listed more than once",
                    entry.path
                )));
            }

            if entry.is_dir {
                folders.insert(entry.path.clone());
            } else {
                if entry.size < 0 && entry.has_known_size() {
                    return Err(SyncError::planning_error(format!(
                        "Remote file '{}' has negative size {}",
                        entry.path, entry.size
                    )));
                }
                files.push(entry);
            }
        }

        let file_paths: HashSet<&str> = files.iter().map(|file| file.path.as_str()).collect();
        let listed_folders = folders.len();
        for entry in remote_entries {
            for ancestor in path::ancestors_of(&entry.path) {
                if file_paths.contains(ancestor) {
                    return Err(SyncError::planning_error(format!(
                        "Remote file '{}' is listed with children ('{}')",
                        ancestor, entry.path
                    )));
                }
                if !folders.contains(ancestor) {
                    folders.insert(ancestor.to_string());
                }
            }
        }
        let implicit_folders = folders.len() - listed_folders;

        Ok(RemoteTree {
            folders,
            files,
            implicit_folders,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DestinationEntry;

    fn dest_folder(name: &str, size: i64) -> DestinationEntry {
        DestinationEntry {
            name: name.to_string(),
            destination_id: format!("id-{}", name),
            is_directory: true,
            size_bytes: size,
        }
    }

    fn dest_file(name: &str, size: i64) -> DestinationEntry {
        DestinationEntry {
            name: name.to_string(),
            destination_id: format!("id-{}", name),
            is_directory: false,
            size_bytes: size,
        }
    }

    fn scenario_tree() -> Vec<RemoteEntry> {
        vec![
            RemoteEntry::file("a.txt", 100),
            RemoteEntry::dir("docs"),
            RemoteEntry::file("docs/b.txt", 2048),
            RemoteEntry::dir("docs/sub"),
            RemoteEntry::file("docs/sub/c.txt", 4096),
        ]
    }

    #[test]
    fn test_empty_destination_selects_everything() {
        let planner = DiffPlanner::new();
        let plan = planner
            .plan_against(&scenario_tree(), &DestinationListing::default(), "")
            .unwrap();

        assert_eq!(plan.folders_to_create, vec!["docs", "docs/sub"]);
        let files: Vec<&str> = plan.files_to_sync.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(files, vec!["a.txt", "docs/b.txt", "docs/sub/c.txt"]);
        assert_eq!(plan.summary().bytes_to_transfer, 100 + 2048 + 4096);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_matching_destination_yields_empty_plan() {
        let planner = DiffPlanner::new();
        let destination = DestinationListing {
            folders: vec![dest_folder("docs", 2048 + 4096)],
            files: vec![dest_file("a.txt", 100)],
        };

        let plan = planner.plan_against(&scenario_tree(), &destination, "").unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary().folders_matched, 1);
        assert_eq!(plan.summary().root_files_matched, 1);
    }

    #[test]
    fn test_tolerance_boundary() {
        let planner = DiffPlanner::new();
        let remote = vec![RemoteEntry::file("report.pdf", 10240)];

        let within = DestinationListing {
            folders: vec![],
            files: vec![dest_file("report.pdf", 10240 + 1023)],
        };
        assert!(planner.plan_against(&remote, &within, "").unwrap().is_empty());

        let outside = DestinationListing {
            folders: vec![],
            files: vec![dest_file("report.pdf", 10240 + 1025)],
        };
        let plan = planner.plan_against(&remote, &outside, "").unwrap();
        assert_eq!(plan.files_to_sync.len(), 1);
        assert_eq!(plan.diagnostics.root_file_comparisons[0].decision, Decision::SizeDiffers);
    }

    #[test]
    fn test_duplicate_path_is_planning_error() {
        let planner = DiffPlanner::new();
        let remote = vec![RemoteEntry::dir("docs"), RemoteEntry::file("docs", 10)];
        let err = planner
            .plan_against(&remote, &DestinationListing::default(), "")
            .unwrap_err();
        assert!(matches!(err, SyncError::Planning(_)));
    }

    #[test]
    fn test_suffix_renamed() {
        assert!(is_suffix_renamed("docs", "docs-1"));
        assert!(is_suffix_renamed("docs", "docs-12"));
        assert!(is_suffix_renamed("report.pdf", "report-2.pdf"));
        assert!(!is_suffix_renamed("docs", "docs-"));
        assert!(!is_suffix_renamed("docs", "docs-final"));
        assert!(!is_suffix_renamed("docs", "docs"));
        assert!(!is_suffix_renamed(".env", ".env-x"));
    }
}
