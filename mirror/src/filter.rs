//! Remote entry filtering using globset

use serde::{Deserialize, Serialize};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Result, SyncError};
use crate::path;
use crate::remote::RemoteEntry;

/// Remote filter options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilterOptions {
    /// Patterns a file must match to be mirrored (if empty, include all)
    pub include_patterns: Vec<String>,
    /// Patterns to exclude; an excluded folder excludes its whole subtree
    pub exclude_patterns: Vec<String>,
    /// Case sensitive matching
    pub case_sensitive: bool,
    /// Include hidden entries (any segment starting with .)
    pub include_hidden: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            case_sensitive: false,
            include_hidden: true,
        }
    }
}

impl FilterOptions {
    /// Whether these options would keep every entry
    pub fn is_noop(&self) -> bool {
        self.include_patterns.is_empty() && self.exclude_patterns.is_empty() && self.include_hidden
    }
}

/// Filter applied to a remote listing before planning
pub struct RemoteFilter {
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
    options: FilterOptions,
}

impl RemoteFilter {
    /// Create a new remote filter with the given options
    pub fn new(options: FilterOptions) -> Result<Self> {
        let include_set = if options.include_patterns.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.include_patterns, options.case_sensitive)?)
        };

        let exclude_set = if options.exclude_patterns.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.exclude_patterns, options.case_sensitive)?)
        };

        Ok(Self {
            include_set,
            exclude_set,
            options,
        })
    }

    /// Check if an entry should be mirrored
    pub fn should_include(&self, entry: &RemoteEntry) -> bool {
        if !self.options.include_hidden && is_hidden(&entry.path) {
            return false;
        }

        if let Some(exclude_set) = &self.exclude_set {
            let excluded = exclude_set.is_match(&entry.path)
                || path::ancestors_of(&entry.path).any(|ancestor| exclude_set.is_match(ancestor));
            if excluded {
                return false;
            }
        }

        // Include patterns select files; folders stay so their content has a home
        if let Some(include_set) = &self.include_set {
            if !entry.is_dir && !include_set.is_match(&entry.path) {
                return false;
            }
        }

        true
    }

    /// Keep only the entries this filter includes
    pub fn apply(&self, entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
        if self.options.is_noop() {
            return entries;
        }
        entries.into_iter().filter(|entry| self.should_include(entry)).collect()
    }

    /// Build a globset from patterns
    fn build_globset(patterns: &[String], case_sensitive: bool) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let mut glob = GlobBuilder::new(pattern);
            glob.literal_separator(false);

            if !case_sensitive {
                glob.case_insensitive(true);
            }

            let compiled_glob = glob.build().map_err(|e| {
                SyncError::FilterPattern(format!("Failed to compile glob '{}': {}", pattern, e))
            })?;

            builder.add(compiled_glob);
        }

        builder.build().map_err(|e| {
            SyncError::FilterPattern(format!("Failed to build globset: {}", e))
        })
    }
}

/// Check if any segment of a remote path is hidden
fn is_hidden(remote_path: &str) -> bool {
    remote_path.split('/').any(|segment| segment.starts_with('.'))
}
