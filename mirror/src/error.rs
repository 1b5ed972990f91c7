//! Error types for the mirror engine

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type for every stage of a mirror run.
///
/// `Enumeration` and `Planning` are fatal to a run. The folder, stream and
/// destination variants are recoverable and end up as data in the run report.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote listing command failed or produced unusable output
    #[error("Enumeration of '{remote}' failed: {message}")]
    Enumeration { remote: String, message: String },

    /// The remote listing was parsed but describes an impossible tree
    #[error("Planning error: {0}")]
    Planning(String),

    /// A destination folder could not be created or located
    #[error("Folder creation failed for '{path}': {message}")]
    FolderCreation { path: String, message: String },

    /// The remote streaming command failed
    #[error("Stream transfer failed for '{path}': {message}")]
    StreamTransfer { path: String, message: String },

    /// The destination store rejected a blob or entry write
    #[error("Destination write failed for '{path}': {source}")]
    DestinationWrite {
        path: String,
        #[source]
        source: StoreError,
    },

    /// A remote file exceeds the configured size ceiling
    #[error("File '{path}' is {size} bytes, above the {limit} byte limit")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    /// Destination browse failures outside of a write
    #[error("Destination store error: {0}")]
    Store(#[from] StoreError),

    /// Filter pattern errors
    #[error("Filter pattern error: {0}")]
    FilterPattern(String),
}

/// Errors reported by a [`DestinationStore`](crate::store::DestinationStore).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// An entry with the same name already exists under the parent
    #[error("'{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Destination entry not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Destination backend error: {0}")]
    Backend(String),

    #[error("IO error while writing content: {0}")]
    Io(String),
}

impl SyncError {
    /// Create a new enumeration error
    pub fn enumeration_error(remote: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Enumeration {
            remote: remote.into(),
            message: message.into(),
        }
    }

    /// Create a new planning error
    pub fn planning_error(message: impl Into<String>) -> Self {
        Self::Planning(message.into())
    }

    /// Create a new folder creation error
    pub fn folder_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FolderCreation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new stream transfer error
    pub fn stream_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StreamTransfer {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new destination write error
    pub fn destination_error(path: impl Into<String>, source: StoreError) -> Self {
        Self::DestinationWrite {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Enumeration { .. }
                | SyncError::Planning(_)
                | SyncError::Store(_)
                | SyncError::FilterPattern(_)
        )
    }

    /// Whether repeating the same per-file call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::StreamTransfer { .. } => true,
            SyncError::DestinationWrite { source, .. } => {
                matches!(source, StoreError::Backend(_) | StoreError::Io(_))
            }
            _ => false,
        }
    }

    /// Short label used when tallying errors by kind
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Enumeration { .. } => "enumeration",
            SyncError::Planning(_) => "planning",
            SyncError::FolderCreation { .. } => "folder_creation",
            SyncError::StreamTransfer { .. } => "stream_transfer",
            SyncError::DestinationWrite { .. } => "destination_write",
            SyncError::FileTooLarge { .. } => "file_too_large",
            SyncError::Store(_) => "store",
            SyncError::FilterPattern(_) => "filter_pattern",
        }
    }
}
