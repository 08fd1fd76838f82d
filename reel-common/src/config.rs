//! Configuration loading and store path resolution
//!
//! Bootstrap configuration comes from a TOML file. Every field has a built-in
//! default, so a missing file is a warning, never a startup failure.
//!
//! # Store Path Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`REEL_STORE_PATH`)
//! 3. TOML config file (`store_path`)
//! 4. OS-dependent compiled default (`<config dir>/reel/store`)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the store directory
pub const STORE_PATH_ENV: &str = "REEL_STORE_PATH";

/// Environment variable overriding the TOML config file location
pub const CONFIG_PATH_ENV: &str = "REEL_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Directory holding one persisted JSON file per item
    ///
    /// If not specified, falls back to `<config dir>/reel/store`
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Number of classification workers
    #[serde(default = "default_classification_workers")]
    pub classification_workers: usize,

    /// Capacity of the classification request channel
    ///
    /// Producers calling `store` block once this many requests are waiting
    /// in front of a saturated station.
    #[serde(default = "default_classification_queue_capacity")]
    pub classification_queue_capacity: usize,

    /// Capacity of the asynchronous classification error channel
    #[serde(default = "default_error_channel_capacity")]
    pub error_channel_capacity: usize,

    /// Remove persisted items whose media file no longer exists on load
    #[serde(default = "default_prune_missing")]
    pub prune_missing: bool,

    /// External classifier configuration
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// External classifier command configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Program and arguments; empty disables classification
    #[serde(default)]
    pub command: Vec<String>,

    /// Upper bound for a single classification, in seconds
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,

    /// Directory receiving one stderr log per classified item
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_classification_workers() -> usize {
    2
}

fn default_classification_queue_capacity() -> usize {
    16
}

fn default_error_channel_capacity() -> usize {
    64
}

fn default_prune_missing() -> bool {
    true
}

fn default_classifier_timeout_secs() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            classification_workers: default_classification_workers(),
            classification_queue_capacity: default_classification_queue_capacity(),
            error_channel_capacity: default_error_channel_capacity(),
            prune_missing: default_prune_missing(),
            classifier: ClassifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: default_classifier_timeout_secs(),
            log_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TomlConfig {
    /// Reject values that would make the station unusable
    pub fn validate(&self) -> Result<()> {
        if self.classification_workers == 0 {
            return Err(Error::Config(
                "classification_workers must be at least 1".to_string(),
            ));
        }
        if self.classification_queue_capacity == 0 {
            return Err(Error::Config(
                "classification_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.error_channel_capacity == 0 {
            return Err(Error::Config(
                "error_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Base directory for reel configuration (`<config dir>/reel`)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("reel"))
        .unwrap_or_else(|| PathBuf::from("./reel"))
}

/// Default TOML config path, honouring `REEL_CONFIG`
pub fn default_config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => config_dir().join("config.toml"),
    }
}

/// Compiled default store directory
pub fn default_store_path() -> PathBuf {
    config_dir().join("store")
}

/// Load TOML config, falling back to defaults when the file is missing
///
/// A present but unparsable file is an error; silently ignoring it would
/// hide a misconfiguration.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found at {}, using built-in defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)?;
    config.validate()?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolve the store directory following the priority order in the module docs
pub fn resolve_store_path(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        debug!("Store path from command line: {}", path.display());
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(STORE_PATH_ENV) {
        if !path.trim().is_empty() {
            debug!("Store path from {}: {}", STORE_PATH_ENV, path);
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.store_path {
        debug!("Store path from TOML config: {}", path.display());
        return path.clone();
    }

    default_store_path()
}

/// Write TOML config atomically (temp file + rename)
///
/// On Unix the file is restricted to the owner since it may carry
/// classifier command lines with credentials.
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = target.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, target)?;
    Ok(())
}
