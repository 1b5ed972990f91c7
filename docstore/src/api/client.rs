use super::{entries::{EntryOperations, RetrySettings}, error::*, types::*};
use async_trait::async_trait;
use reqwest::ClientBuilder;
use std::time::Duration;
use tracing::{debug, info};
use tree_mirror::{
    BlobBody, BlobMeta, DestinationListing, DestinationStore, StoreError, VersionedEntry,
};
use url::Url;

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Default number of entries requested per page when browsing
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Main document store API client
pub struct DocStoreClient {
    /// Entry and blob operations
    pub entries: EntryOperations,

    /// HTTP client for making requests
    http_client: reqwest::Client,

    /// Base URL of the document store
    base_url: String,
}

impl DocStoreClient {
    /// Create a new client with default settings and no credentials
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        DocStoreClientBuilder::new(base_url).build()
    }

    /// Create a new client with custom HTTP client configuration
    pub fn with_client(
        base_url: impl Into<String>,
        http_client: reqwest::Client,
        token: Option<String>,
        page_size: u32,
        retry: RetrySettings,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let entries = EntryOperations::new(http_client.clone(), base_url.clone(), token, page_size, retry);

        Self {
            entries,
            http_client,
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check health of the document store
    pub async fn health_check(&self) -> Result<HealthResponse> {
        debug!("Performing health check");

        let response = self
            .http_client
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;

        if response.status().is_success() {
            let health: HealthResponse = response.json().await?;
            debug!("Health check successful: {}", health.message);
            Ok(health)
        } else {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            Err(DocStoreError::Server {
                status,
                message: error_text,
            })
        }
    }
}

#[async_trait]
impl DestinationStore for DocStoreClient {
    async fn browse_children(&self, parent_id: &str) -> StoreResult<DestinationListing> {
        Ok(self.entries.browse(parent_id).await?)
    }

    async fn create_entry(&self, parent_id: &str, name: &str, is_directory: bool) -> StoreResult<String> {
        let record = self.entries.create(parent_id, name, is_directory).await?;
        Ok(record.id)
    }

    async fn save_blob(&self, content: BlobBody, meta: BlobMeta) -> StoreResult<String> {
        let blob = self.entries.upload_blob(content, &meta).await?;
        Ok(blob.id)
    }

    async fn create_versioned_entry(&self, blob_id: &str, entry: VersionedEntry) -> StoreResult<String> {
        let record = self.entries.create_versioned(blob_id, &entry).await?;
        Ok(record.id)
    }
}

// Builder pattern for client configuration
pub struct DocStoreClientBuilder {
    base_url: String,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    api_token: Option<String>,
    page_size: u32,
    retry: RetrySettings,
}

impl DocStoreClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: None,
            api_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetrySettings::default(),
        }
    }

    /// Overall request timeout; blob uploads are bounded by it too
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Bearer token sent with every request
    pub fn api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<DocStoreClient> {
        let parsed = Url::parse(&self.base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DocStoreError::Validation(format!(
                "Unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(connect_timeout) = self.connect_timeout {
            client_builder = client_builder.connect_timeout(connect_timeout);
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("tree-mirror/{}", env!("CARGO_PKG_VERSION")));
        client_builder = client_builder.user_agent(user_agent);

        let http_client = client_builder.build().map_err(DocStoreError::Network)?;

        info!(base_url = %self.base_url, authenticated = self.api_token.is_some(), "Document store client ready");
        Ok(DocStoreClient::with_client(
            self.base_url,
            http_client,
            self.api_token,
            self.page_size,
            self.retry,
        ))
    }
}
