use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use docstore::{DocStoreClient, DocStoreClientBuilder};
use tree_mirror::planner::DEFAULT_TOLERANCE_KIB;
use tree_mirror::transfer::{DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE};
use tree_mirror::{EngineOptions, FilterOptions, RcloneSource, RemoteContext, RemoteFilter, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// rclone remote name, without the trailing colon
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub root_path: String,
    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rclone_config: Option<PathBuf>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Destination folder the remote root is mirrored into
    #[serde(default)]
    pub root_parent_id: String,
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_tolerance_kib")]
    pub tolerance_kib: f64,
    #[serde(default = "default_folder_concurrency")]
    pub folder_concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay", with = "humantime_serde")]
    pub batch_delay: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    /// Attempts per file; 1 disables retries
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_initial_interval", with = "humantime_serde")]
    pub retry_initial_interval: Duration,
    #[serde(default = "default_retry_max_interval", with = "humantime_serde")]
    pub retry_max_interval: Duration,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_true")]
    pub include_hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON lines on the console instead of pretty output
    #[serde(default)]
    pub json: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub rotation: LogRotation,
}

/// Values given on the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub profile: Option<String>,
    pub root_path: Option<String>,
    pub store_url: Option<String>,
    pub root_parent_id: Option<String>,
    pub log_level: Option<String>,
}

fn default_rclone_binary() -> PathBuf {
    PathBuf::from("rclone")
}

fn default_store_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_page_size() -> u32 {
    docstore::api::client::DEFAULT_PAGE_SIZE
}

fn default_tolerance_kib() -> f64 {
    DEFAULT_TOLERANCE_KIB
}

fn default_folder_concurrency() -> usize {
    1
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay() -> Duration {
    DEFAULT_BATCH_DELAY
}

fn default_retry_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_retry_initial_interval() -> Duration {
    RetryPolicy::default().initial_interval
}

fn default_retry_max_interval() -> Duration {
    RetryPolicy::default().max_interval
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            root_path: String::new(),
            rclone_binary: default_rclone_binary(),
            rclone_config: None,
            extra_args: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            api_token: None,
            root_parent_id: String::new(),
            timeout: default_store_timeout(),
            connect_timeout: default_connect_timeout(),
            page_size: default_page_size(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tolerance_kib: default_tolerance_kib(),
            folder_concurrency: default_folder_concurrency(),
            batch_size: default_batch_size(),
            batch_delay: default_batch_delay(),
            max_file_size: None,
            retry_attempts: default_retry_attempts(),
            retry_initial_interval: default_retry_initial_interval(),
            retry_max_interval: default_retry_max_interval(),
            include: Vec::new(),
            exclude: Vec::new(),
            case_sensitive: false,
            include_hidden: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            rotation: LogRotation::default(),
        }
    }
}

/// `<config dir>/tree-mirror/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tree-mirror").join("config.toml"))
}

impl MirrorConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: MirrorConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Load `path`, or the default location if it exists, or built-in defaults
    pub async fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path).await,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::load(default).await,
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(profile) = &overrides.profile {
            self.remote.profile = profile.clone();
        }
        if let Some(root_path) = &overrides.root_path {
            self.remote.root_path = root_path.clone();
        }
        if let Some(url) = &overrides.store_url {
            self.store.url = url.clone();
        }
        if let Some(root_parent_id) = &overrides.root_parent_id {
            self.store.root_parent_id = root_parent_id.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.store.url)
            .with_context(|| format!("Invalid store URL '{}'", self.store.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Store URL must use http or https, got '{}'", url.scheme());
        }

        if self.remote.profile.contains(':') {
            anyhow::bail!("Remote profile must not contain ':' ({})", self.remote.profile);
        }

        if self.sync.batch_size == 0 {
            anyhow::bail!("sync.batch_size must be at least 1");
        }

        if self.sync.folder_concurrency == 0 {
            anyhow::bail!("sync.folder_concurrency must be at least 1");
        }

        if self.sync.tolerance_kib.is_nan() || self.sync.tolerance_kib < 0.0 {
            anyhow::bail!("sync.tolerance_kib must be zero or positive");
        }

        if self.sync.retry_attempts == 0 {
            anyhow::bail!("sync.retry_attempts must be at least 1");
        }

        if self.store.page_size == 0 {
            anyhow::bail!("store.page_size must be at least 1");
        }

        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("Unknown log level '{}'", self.logging.level);
        }

        RemoteFilter::new(self.filter_options())?;

        Ok(())
    }

    /// Remote context for a run; the profile is mandatory here
    pub fn remote_context(&self) -> Result<RemoteContext> {
        if self.remote.profile.trim().is_empty() {
            anyhow::bail!("No remote profile configured (set remote.profile or pass --profile)");
        }
        Ok(RemoteContext::new(&self.remote.profile, &self.remote.root_path))
    }

    pub fn root_parent_id(&self) -> Result<&str> {
        if self.store.root_parent_id.trim().is_empty() {
            anyhow::bail!("No destination root configured (set store.root_parent_id or pass --root-id)");
        }
        Ok(&self.store.root_parent_id)
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            include_patterns: self.sync.include.clone(),
            exclude_patterns: self.sync.exclude.clone(),
            case_sensitive: self.sync.case_sensitive,
            include_hidden: self.sync.include_hidden,
        }
    }

    pub fn to_engine_options(&self) -> EngineOptions {
        let retry = (self.sync.retry_attempts > 1).then(|| RetryPolicy {
            max_attempts: self.sync.retry_attempts,
            initial_interval: self.sync.retry_initial_interval,
            max_interval: self.sync.retry_max_interval,
        });

        EngineOptions {
            tolerance_kib: self.sync.tolerance_kib,
            folder_concurrency: self.sync.folder_concurrency,
            batch_size: self.sync.batch_size,
            batch_delay: self.sync.batch_delay,
            max_file_size: self.sync.max_file_size,
            retry,
            filter: self.filter_options(),
        }
    }

    pub fn build_source(&self) -> RcloneSource {
        let mut source =
            RcloneSource::new(&self.remote.rclone_binary).with_extra_args(self.remote.extra_args.clone());
        if let Some(config_file) = &self.remote.rclone_config {
            source = source.with_config_file(config_file);
        }
        source
    }

    pub fn build_store(&self) -> Result<DocStoreClient> {
        let client = DocStoreClientBuilder::new(&self.store.url)
            .timeout(self.store.timeout)
            .connect_timeout(self.store.connect_timeout)
            .api_token(self.store.api_token.clone())
            .page_size(self.store.page_size)
            .build()?;
        Ok(client)
    }
}
