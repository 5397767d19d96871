//! Application configuration for relnotes.
//!
//! User config lives at `~/.relnotes/relnotes.toml`.
//! CLI flags and env vars override config file values, which override defaults.
//! Secrets are never stored here: each service section names the env var
//! that holds its credential.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelnotesError, Result};
use crate::retry::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "relnotes.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".relnotes";

/// Env var that overrides `[defaults] watermark`.
pub const WATERMARK_ENV: &str = "LAST_PUBLISHED_AT";

// ---------------------------------------------------------------------------
// Config structs (matching relnotes.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub scrape: ScrapeConfig,

    #[serde(default)]
    pub translator: TranslatorConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Which extraction strategy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Query,
    Scrape,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Fixed watermark; when unset the batch run computes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,

    /// Days subtracted from today for the computed watermark.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Offset from UTC, in hours, that defines "today".
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Extraction strategy for batch runs.
    #[serde(default)]
    pub source: SourceKind,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            watermark: None,
            lookback_days: default_lookback_days(),
            utc_offset_hours: default_utc_offset_hours(),
            source: SourceKind::default(),
        }
    }
}

fn default_lookback_days() -> u32 {
    4
}
fn default_utc_offset_hours() -> i32 {
    9
}

/// How the structured query compares `published_at` to the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateFilter {
    /// `published_at > @watermark`
    #[default]
    After,
    /// `published_at = @watermark` (daily batch)
    On,
}

/// `[query]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_endpoint")]
    pub endpoint: String,

    /// Project billed for the query job.
    #[serde(default)]
    pub project_id: String,

    /// Fully qualified `project.dataset.table`.
    #[serde(default = "default_query_table")]
    pub table: String,

    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    #[serde(default)]
    pub filter: DateFilter,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_query_endpoint(),
            project_id: String::new(),
            table: default_query_table(),
            access_token_env: default_access_token_env(),
            filter: DateFilter::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_query_endpoint() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".into()
}
fn default_query_table() -> String {
    "bigquery-public-data.google_cloud_release_notes.release_notes".into()
}
fn default_access_token_env() -> String {
    "BIGQUERY_ACCESS_TOKEN".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[scrape]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_scrape_url")]
    pub url: String,

    /// Watermark applied by `/crawl`.
    #[serde(default = "default_scrape_watermark")]
    pub watermark: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            url: default_scrape_url(),
            watermark: default_scrape_watermark(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_scrape_url() -> String {
    "https://cloud.google.com/release-notes".into()
}
fn default_scrape_watermark() -> String {
    "February 18, 2025".into()
}

/// `[translator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_translator_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Target language for summaries.
    #[serde(default = "default_language")]
    pub language: String,

    /// Maximum translations in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Budget for one translation including retries.
    #[serde(default = "default_translator_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_translator_endpoint(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            language: default_language(),
            concurrency: default_concurrency(),
            timeout_secs: default_translator_timeout_secs(),
        }
    }
}

fn default_translator_endpoint() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_language() -> String {
    "Japanese".into()
}
fn default_concurrency() -> usize {
    8
}
fn default_translator_timeout_secs() -> u64 {
    120
}

/// `[notifier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_channel")]
    pub channel: String,

    /// Page the header deep link points into.
    #[serde(default = "default_scrape_url")]
    pub link_base: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            endpoint: default_notifier_endpoint(),
            token_env: default_token_env(),
            channel: default_channel(),
            link_base: default_scrape_url(),
        }
    }
}

fn default_notifier_endpoint() -> String {
    "https://slack.com/api".into()
}
fn default_token_env() -> String {
    "SLACK_BOT_TOKEN".into()
}
fn default_channel() -> String {
    "#release-notes".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,

    /// Multiplied by `backoff_base ^ attempt`.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u32 {
    5
}
fn default_backoff_unit_ms() -> u64 {
    1_000
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            backoff_unit: Duration::from_millis(config.backoff_unit_ms),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.relnotes/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RelnotesError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.relnotes/relnotes.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| RelnotesError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RelnotesError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RelnotesError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| RelnotesError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RelnotesError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Apply env overrides that the deployment sets instead of editing the file.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(value) = std::env::var(WATERMARK_ENV) {
        if !value.trim().is_empty() {
            config.defaults.watermark = Some(value);
        }
    }
}

/// Read a credential from the env var named by config.
pub fn resolve_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(RelnotesError::config(format!(
            "credential not found. Set the {var_name} environment variable."
        ))),
    }
}
