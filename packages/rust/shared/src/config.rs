//! Application configuration for espforge.
//!
//! User config lives at `~/.espforge/espforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EspforgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "espforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".espforge";

// ---------------------------------------------------------------------------
// Config structs (matching espforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Scraping policy.
    #[serde(default)]
    pub scrape: ScrapeSection,

    /// Defaults for new device configurations.
    #[serde(default)]
    pub device: DeviceDefaults,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Catalog database path (`~` expands to the home directory).
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.espforge/catalog.db".into()
}

/// `[scrape]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSection {
    /// Component index page used by `scrape-index`.
    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Maximum concurrent scrape jobs.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Minimum ms between requests to the same host.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Attempts per page before a transient failure is reported.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on every further retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Upper bound on pages scraped from the index in one run.
    #[serde(default = "default_max_components")]
    pub max_components: usize,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            index_url: default_index_url(),
            concurrency: default_concurrency(),
            rate_limit_ms: default_rate_limit(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            timeout_secs: default_timeout(),
            max_components: default_max_components(),
        }
    }
}

fn default_index_url() -> String {
    "https://esphome.io/components/".into()
}
fn default_concurrency() -> u32 {
    2
}
fn default_rate_limit() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_timeout() -> u64 {
    15
}
fn default_max_components() -> usize {
    100
}

/// `[device]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefaults {
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_board")]
    pub board: String,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            board: default_board(),
        }
    }
}

fn default_platform() -> String {
    "esp32".into()
}
fn default_board() -> String {
    "nodemcu-32s".into()
}

// ---------------------------------------------------------------------------
// Scrape config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime scrape configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Maximum concurrent scrape jobs.
    pub concurrency: u32,
    /// Minimum ms between request starts to the same host.
    pub rate_limit_ms: u64,
    /// Attempts per page (at least 1).
    pub max_attempts: u32,
    /// First retry delay in ms.
    pub initial_backoff_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ScrapeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.scrape.concurrency.max(1),
            rate_limit_ms: config.scrape.rate_limit_ms,
            max_attempts: config.scrape.max_attempts.max(1),
            initial_backoff_ms: config.scrape.initial_backoff_ms,
            timeout_secs: config.scrape.timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.espforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EspforgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.espforge/espforge.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| EspforgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EspforgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EspforgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EspforgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EspforgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the configured database path, expanding a leading `~/`.
pub fn resolve_db_path(config: &AppConfig) -> Result<PathBuf> {
    expand_home(&config.defaults.db_path)
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| EspforgeError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}
