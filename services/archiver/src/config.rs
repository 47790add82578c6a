//! Run configuration loaded from YAML.
//!
//! Every field has a default, so a missing file means built-in settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use archive_common::{Element, Model};
use archive_store::S3Settings;
use extraction::stations::DEFAULT_METADATA_URL;
use extraction::{HttpSettings, RetryPolicy};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiverConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Base URL overrides keyed by model name
    #[serde(default)]
    pub model_urls: HashMap<String, String>,
    /// Forecast hour overrides keyed by `model/element`
    #[serde(default)]
    pub forecast_hours: HashMap<String, Vec<u32>>,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub stations: StationsConfig,
}

fn default_max_workers() -> usize {
    8
}

fn default_task_timeout() -> u64 {
    900
}

fn default_download_dir() -> PathBuf {
    std::env::temp_dir().join("model-archiver")
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
            task_timeout_secs: default_task_timeout(),
            model_urls: HashMap::new(),
            forecast_hours: HashMap::new(),
            download_dir: default_download_dir(),
            archive: ArchiveConfig::default(),
            stations: StationsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    1
}

fn default_max_delay() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    #[serde(default)]
    pub s3: Option<S3Settings>,
}

fn default_local_root() -> PathBuf {
    PathBuf::from("archive")
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            local_root: default_local_root(),
            s3: None,
        }
    }
}

/// Station metadata source.
#[derive(Debug, Clone, Deserialize)]
pub struct StationsConfig {
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    #[serde(default = "default_state")]
    pub state: String,
    /// Comma-separated network ids
    #[serde(default = "default_network")]
    pub network: String,
    /// Directory for cached station lists
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_metadata_url() -> String {
    DEFAULT_METADATA_URL.to_string()
}

fn default_state() -> String {
    "AK".to_string()
}

fn default_network() -> String {
    "1,2".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("stations")
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            metadata_url: default_metadata_url(),
            state: default_state(),
            network: default_network(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl ArchiverConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            initial_delay: Duration::from_secs(self.retry.initial_delay_secs),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            request_timeout: Duration::from_secs(self.http.timeout_secs),
            probe_timeout: Duration::from_secs(self.http.probe_timeout_secs),
            ..HttpSettings::default()
        }
    }

    pub fn base_url(&self, model: Model) -> Option<String> {
        self.model_urls.get(model.as_str()).cloned()
    }

    /// Configured hours for `model/element`; empty means the element's defaults.
    pub fn forecast_hours_for(&self, model: Model, element: Element) -> Vec<u32> {
        self.forecast_hours
            .get(&format!("{}/{}", model, element))
            .cloned()
            .unwrap_or_default()
    }
}
