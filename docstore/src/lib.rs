//! Document store client
//!
//! This crate talks to the hierarchical document store over HTTP and
//! implements the mirror engine's [`DestinationStore`](tree_mirror::DestinationStore)
//! seam on top of it.

pub mod api;

pub use api::{DocStoreClient, DocStoreClientBuilder, DocStoreError, RetrySettings};
