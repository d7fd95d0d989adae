//! Application configuration for CatalogSync.
//!
//! User config lives at `~/.catalogsync/catalogsync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "catalogsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".catalogsync";

// ---------------------------------------------------------------------------
// Config structs (matching catalogsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub vendors: VendorsConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the product database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "var/catalogsync.db".into()
}

/// `[vendors]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorsConfig {
    /// Base URL serving one CSV per vendor at `{base_url}/{name}`.
    #[serde(default = "default_vendor_base_url")]
    pub base_url: String,

    /// Vendors imported on every scheduler tick.
    #[serde(default = "default_vendor_names")]
    pub names: Vec<String>,
}

impl Default for VendorsConfig {
    fn default() -> Self {
        Self {
            base_url: default_vendor_base_url(),
            names: default_vendor_names(),
        }
    }
}

impl VendorsConfig {
    /// Resolve the CSV download URL of a vendor.
    pub fn csv_url(&self, vendor: &str) -> Result<url::Url> {
        let raw = format!("{}/{}", self.base_url.trim_end_matches('/'), vendor);
        url::Url::parse(&raw)
            .map_err(|e| CatalogSyncError::config(format!("invalid vendor URL '{raw}': {e}")))
    }
}

fn default_vendor_base_url() -> String {
    "http://localhost:3000/download".into()
}
fn default_vendor_names() -> Vec<String> {
    vec!["v1".into(), "v2".into()]
}

/// `[import]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Documents per bulk upsert.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Directory for staging files of downloaded CSVs.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    /// Timeout for one whole CSV download.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            staging_dir: default_staging_dir(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

fn default_batch_size() -> usize {
    5000
}
fn default_staging_dir() -> String {
    "temp".into()
}
fn default_download_timeout() -> u64 {
    300
}

/// `[generator]` section: the external text-generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_generator_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout.
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,

    /// Outstanding calls allowed across all running jobs.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_generator_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_generator_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

fn default_generator_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generator_timeout() -> u64 {
    30
}
fn default_max_concurrent_requests() -> usize {
    10
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Whether jobs run the enrichment pass after ingest.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Outstanding generation calls per job window.
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: default_window(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_window() -> usize {
    10
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two rounds of vendor jobs.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum jobs running in parallel.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Pending jobs the queue holds before producers wait.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            worker_concurrency: default_worker_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_interval() -> u64 {
    60
}
fn default_worker_concurrency() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    64
}

/// `[retry]` section: bounded exponential backoff for external calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    10_000
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.catalogsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CatalogSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.catalogsync/catalogsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CatalogSyncError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CatalogSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CatalogSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CatalogSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CatalogSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject settings the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.import.batch_size == 0 {
        return Err(CatalogSyncError::config("import.batch_size must be at least 1"));
    }
    if config.enrichment.window == 0 {
        return Err(CatalogSyncError::config("enrichment.window must be at least 1"));
    }
    if config.generator.max_concurrent_requests == 0 {
        return Err(CatalogSyncError::config(
            "generator.max_concurrent_requests must be at least 1",
        ));
    }
    if config.scheduler.worker_concurrency == 0 {
        return Err(CatalogSyncError::config(
            "scheduler.worker_concurrency must be at least 1",
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(CatalogSyncError::config("retry.max_attempts must be at least 1"));
    }
    Ok(())
}

/// Read the generation service API key from its configured env var.
pub fn resolve_api_key(config: &GeneratorConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(CatalogSyncError::config(format!(
            "generation API key not found. Set the {var_name} environment variable."
        ))),
    }
}
