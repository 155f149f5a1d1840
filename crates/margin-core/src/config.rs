//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/margin/config.toml)
//! 3. Environment variables (MARGIN_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::matcher::{MAX_CONFIDENCE, RECOMMENDED_AUTO_APPLY};
use crate::storage::atomic_write;

/// Environment variable prefix
const ENV_PREFIX: &str = "MARGIN";

/// Where merged annotations are written on a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// A free-form field shared with user text (e.g. comments)
    #[default]
    FreeText,
    /// A field dedicated to annotations
    Structured,
}

impl std::str::FromStr for Destination {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free_text" | "free-text" | "comments" => Ok(Destination::FreeText),
            "structured" => Ok(Destination::Structured),
            other => anyhow::bail!(
                "Unknown destination '{}'. Use 'free_text' or 'structured'.",
                other
            ),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::FreeText => write!(f, "free_text"),
            Destination::Structured => write!(f, "structured"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (annotation database)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File-backed library catalog (defaults to `<data_dir>/library.json`)
    #[serde(default)]
    pub library_path: Option<PathBuf>,

    /// Confidence at or above which annotations merge without confirmation
    #[serde(default = "default_auto_apply_threshold")]
    pub auto_apply_threshold: u8,

    /// Which catalog field receives the annotation block
    #[serde(default)]
    pub destination: Destination,

    /// Route books tagged with the `News` genre to a single catalog entry
    #[serde(default)]
    pub collect_news_clippings: bool,

    /// Catalog id that collects news clippings
    #[serde(default)]
    pub news_clippings_target: Option<i64>,

    /// Reader-app export files registered at startup
    #[serde(default)]
    pub reader_exports: Vec<PathBuf>,

    /// Optional log file path
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            library_path: None,
            auto_apply_threshold: default_auto_apply_threshold(),
            destination: Destination::default(),
            collect_news_clippings: false,
            news_clippings_target: None,
            reader_exports: Vec::new(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path from the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.normalize();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_LIBRARY", ENV_PREFIX)) {
            self.library_path = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = std::env::var(format!("{}_AUTO_APPLY_THRESHOLD", ENV_PREFIX)) {
            if let Ok(threshold) = val.parse() {
                self.auto_apply_threshold = threshold;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_DESTINATION", ENV_PREFIX)) {
            if let Ok(destination) = val.parse() {
                self.destination = destination;
            }
        }
    }

    /// Clamp values that have a fixed domain
    fn normalize(&mut self) {
        self.auto_apply_threshold = self.auto_apply_threshold.min(MAX_CONFIDENCE);
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        atomic_write(config_path, content.as_bytes())
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with MARGIN_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("margin")
            .join("config.toml")
    }

    /// Get the path to the annotation database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("annotations.db")
    }

    /// Get the path to the file-backed library catalog
    pub fn library_path(&self) -> PathBuf {
        self.library_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("library.json"))
    }

    /// News clippings target, if routing is enabled
    pub fn news_clippings(&self) -> Option<i64> {
        if self.collect_news_clippings {
            self.news_clippings_target
        } else {
            None
        }
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("margin")
}

fn default_auto_apply_threshold() -> u8 {
    RECOMMENDED_AUTO_APPLY
}
