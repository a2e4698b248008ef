//! Application configuration for govsite.
//!
//! User config lives at `~/.govsite/govsite.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GovsiteError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "govsite.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".govsite";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "govsite.db";

// ---------------------------------------------------------------------------
// Config structs (matching govsite.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Remote source fetching.
    #[serde(default)]
    pub sync: SyncSettings,

    /// CSV import defaults.
    #[serde(default)]
    pub import: ImportConfig,

    /// Selectors and class names for page enhancements.
    #[serde(default)]
    pub pages: PageConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. Empty means `~/.govsite/govsite.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl DatabaseConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match self.path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => Ok(expand_home(p)),
            _ => Ok(config_dir()?.join(DATABASE_FILE_NAME)),
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// HTTP timeout per source, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// User-Agent sent with every fetch.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> f64 {
    15.0
}
fn default_user_agent() -> String {
    concat!("govsite-content-discovery/", env!("CARGO_PKG_VERSION")).into()
}

/// `[import]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Default CSV delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
        }
    }
}

fn default_delimiter() -> String {
    ",".into()
}

/// `[pages]` section: hooks the page enhancements look for in rendered HTML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub card_selector: String,
    pub card_clickable_class: String,
    pub card_href_attribute: String,

    pub link_region_selectors: Vec<String>,
    pub link_class: String,
    pub button_class: String,
    pub masthead_selector: String,
    pub masthead_combined_class: String,
    pub inverse_link_class: String,

    pub heading_content_selector: String,
    pub heading_nav_selector: String,
    pub heading_nav_column_selector: String,
    pub heading_main_column_selector: String,
    pub two_thirds_class: String,
    pub full_width_class: String,

    pub start_button_selector: String,
    pub start_icon_class: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            card_selector: ".section-card".into(),
            card_clickable_class: "section-card--clickable".into(),
            card_href_attribute: "data-card-href".into(),
            link_region_selectors: vec![".rich-text".into(), ".app-masthead".into()],
            link_class: "govuk-link".into(),
            button_class: "govuk-button".into(),
            masthead_selector: ".app-masthead".into(),
            masthead_combined_class: "app-masthead--combined".into(),
            inverse_link_class: "govuk-link--inverse".into(),
            heading_content_selector: "[data-heading-nav-content]".into(),
            heading_nav_selector: "[data-heading-nav]".into(),
            heading_nav_column_selector: "[data-heading-nav-column]".into(),
            heading_main_column_selector: "[data-heading-nav-main]".into(),
            two_thirds_class: "govuk-grid-column-two-thirds".into(),
            full_width_class: "govuk-grid-column-full".into(),
            start_button_selector: ".govuk-button--start".into(),
            start_icon_class: "govuk-button__start-icon".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration, merged from config file and CLI flags.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// HTTP timeout per source.
    pub timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SyncConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs_f64(config.sync.timeout_secs.max(0.1)),
            user_agent: config.sync.user_agent.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.govsite/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| GovsiteError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.govsite/govsite.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| GovsiteError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GovsiteError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GovsiteError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| GovsiteError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GovsiteError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
