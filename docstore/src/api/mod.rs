//! Document store API client module
//!
//! This module wraps the document store's REST API: paginated browsing of
//! a parent's children, folder creation, streamed blob upload and versioned
//! entry creation, with automatic retries for idempotent calls.

pub mod client;
pub mod entries;
pub mod error;
pub mod types;

// Re-export main types for convenience
pub use client::{DocStoreClient, DocStoreClientBuilder, DEFAULT_PAGE_SIZE};
pub use entries::{EntryOperations, RetrySettings};
pub use error::{DocStoreError, Result};
pub use types::*;
