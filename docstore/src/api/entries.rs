use super::{error::*, types::*};
use backoff::{future::retry, ExponentialBackoff};
use futures::Stream;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use tree_mirror::{BlobBody, BlobMeta, DestinationEntry, DestinationListing, VersionedEntry};

/// Retry timing for idempotent calls
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Duration::from_secs(60),
        }
    }
}

/// Request body stream; the mutex only supplies the `Sync` bound reqwest asks for
struct BodyStream<S>(Mutex<S>);

impl<S: Stream + Unpin> Stream for BodyStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = match self.get_mut().0.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        Pin::new(inner).poll_next(cx)
    }
}

pub struct EntryOperations {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    page_size: u32,
    retry: RetrySettings,
}

impl EntryOperations {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        token: Option<String>,
        page_size: u32,
        retry: RetrySettings,
    ) -> Self {
        Self {
            client,
            base_url,
            token,
            page_size: page_size.max(1),
            retry,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// List one page of children of `parent_id`
    pub async fn list_children(&self, parent_id: &str, page: u32) -> Result<ListResult<EntryRecord>> {
        let params = ListParams::new()
            .parent(parent_id)
            .page(page)
            .per_page(self.page_size)
            .sort("name");

        let operation = || async {
            let mut url = format!("{}/api/entries", self.base_url);
            url.push('?');
            url.push_str(&serde_urlencoded::to_string(&params).unwrap_or_default());

            let response = self.authorize(self.client.get(&url)).send().await?;
            self.handle_response(response, parent_id).await
        };

        self.retry_operation(operation).await
    }

    /// Browse every child of `parent_id` (with automatic pagination)
    pub async fn browse(&self, parent_id: &str) -> Result<DestinationListing> {
        let mut listing = DestinationListing::default();
        let mut page = 1;

        loop {
            let result = self.list_children(parent_id, page).await?;

            for record in result.items {
                let entry = DestinationEntry::from(record);
                if entry.is_directory {
                    listing.folders.push(entry);
                } else {
                    listing.files.push(entry);
                }
            }

            if page >= result.total_pages {
                break;
            }

            page += 1;
        }

        debug!(
            parent_id = %parent_id,
            folders = listing.folders.len(),
            files = listing.files.len(),
            "Browsed destination children"
        );
        Ok(listing)
    }

    /// Create a folder or entry under `parent_id`
    pub async fn create(&self, parent_id: &str, name: &str, is_directory: bool) -> Result<EntryRecord> {
        let body = CreateEntryRequest {
            parent_id,
            name,
            is_directory,
        };

        let operation = || async {
            let url = format!("{}/api/entries", self.base_url);
            let response = self.authorize(self.client.post(&url).json(&body)).send().await?;
            self.handle_response(response, name).await
        };

        self.retry_operation(operation).await
    }

    /// Upload a blob; the body stream is consumed, so this is never retried
    pub async fn upload_blob(&self, content: BlobBody, meta: &BlobMeta) -> Result<BlobRecord> {
        let url = format!("{}/api/blobs", self.base_url);
        let body = reqwest::Body::wrap_stream(BodyStream(Mutex::new(ReaderStream::new(content))));

        let request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, meta.content_type.as_str())
            .header("X-Filename", meta.filename.as_str())
            .header("X-Expected-Size", meta.size)
            .body(body);

        let response = self.authorize(request).send().await?;
        self.handle_response(response, &meta.filename).await
    }

    /// Attach `blob_id` to the tree as a versioned entry
    pub async fn create_versioned(&self, blob_id: &str, entry: &VersionedEntry) -> Result<EntryRecord> {
        let body = VersionedEntryRequest {
            parent_id: &entry.parent_id,
            name: &entry.name,
            size: entry.size,
            content_type: &entry.content_type,
        };

        let url = format!("{}/api/blobs/{}/entries", self.base_url, blob_id);
        let response = self.authorize(self.client.post(&url).json(&body)).send().await?;
        self.handle_response(response, &entry.name).await
    }

    // Helper methods

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response, subject: &str) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        Err(DocStoreError::from_status(status, subject, &body, retry_after))
    }

    async fn retry_operation<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoff {
            current_interval: self.retry.initial_interval,
            initial_interval: self.retry.initial_interval,
            max_interval: self.retry.max_interval,
            max_elapsed_time: Some(self.retry.max_elapsed_time),
            ..Default::default()
        };

        retry(backoff, || async {
            match operation().await {
                Ok(result) => Ok(result),
                Err(error) => {
                    if error.is_retryable() {
                        warn!("Retryable error occurred: {}", error);
                        match error.retry_after() {
                            Some(secs) => Err(backoff::Error::retry_after(error, Duration::from_secs(secs))),
                            None => Err(backoff::Error::transient(error)),
                        }
                    } else {
                        debug!("Non-retryable error: {}", error);
                        Err(backoff::Error::permanent(error))
                    }
                }
            }
        })
        .await
    }
}
