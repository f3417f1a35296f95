//! Configuration loading and resolution
//!
//! Every setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged and
//! the compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding the service base URL
pub const ENV_API_URL: &str = "FDASH_API_URL";
/// Environment variable overriding the local data folder
pub const ENV_DATA_FOLDER: &str = "FDASH_DATA_FOLDER";
/// Environment variable pointing at an explicit TOML config file
pub const ENV_CONFIG_FILE: &str = "FDASH_CONFIG";

/// TOML configuration file contents
///
/// All fields are optional so a partial file only overrides what it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Base URL of the document processing service
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// Folder holding the local session database
    #[serde(default)]
    pub data_folder: Option<PathBuf>,

    /// Upper bound for any single network call
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Fixed delay between status polls
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Consecutive failed polls tolerated before an item is marked failed
    #[serde(default)]
    pub max_poll_failures: Option<u32>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled defaults used when no other source provides a value
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub api_base_url: String,
    pub data_folder: PathBuf,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_failures: u32,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform the binary was built for
    pub fn for_current_platform() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".to_string(),
            data_folder: default_data_folder(),
            request_timeout_ms: 30_000,
            poll_interval_ms: 2_000,
            max_poll_failures: 5,
            log_level: default_log_level(),
        }
    }
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/fdash
        dirs::data_local_dir()
            .map(|d| d.join("fdash"))
            .unwrap_or_else(|| PathBuf::from("./fdash_data"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/fdash
        dirs::data_dir()
            .map(|d| d.join("fdash"))
            .unwrap_or_else(|| PathBuf::from("./fdash_data"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\fdash
        dirs::data_local_dir()
            .map(|d| d.join("fdash"))
            .unwrap_or_else(|| PathBuf::from("./fdash_data"))
    } else {
        PathBuf::from("./fdash_data")
    }
}

/// Fully resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub data_folder: PathBuf,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Path of the SQLite database inside the data folder
    pub fn database_path(&self) -> PathBuf {
        self.data_folder.join("fdash.db")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ConfigResolver::new().resolve_with(TomlConfig::default())
    }
}

/// A resolved config plus the fallbacks taken while resolving it
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: ClientConfig,
    pub warnings: Vec<String>,
}

impl Resolution {
    /// Emit every warning through `tracing`
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
    }

    fn logged(self) -> ClientConfig {
        self.log_warnings();
        self.config
    }
}

/// Resolves a [`ClientConfig`] from CLI, environment, TOML and defaults
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_api_url: Option<String>,
    cli_data_folder: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base URL given on the command line
    pub fn with_api_url(mut self, url: Option<String>) -> Self {
        self.cli_api_url = url;
        self
    }

    /// Data folder given on the command line
    pub fn with_data_folder(mut self, folder: Option<PathBuf>) -> Self {
        self.cli_data_folder = folder;
        self
    }

    /// Explicit TOML file, bypassing the platform search
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Resolve using the TOML file found on disk (if any)
    pub fn resolve(&self) -> ClientConfig {
        self.resolution().logged()
    }

    /// Resolve against an already-loaded TOML config
    pub fn resolve_with(&self, toml_config: TomlConfig) -> ClientConfig {
        self.resolution_with(toml_config).logged()
    }

    /// Like [`resolve`](Self::resolve), but hands the warnings back instead of
    /// logging them
    ///
    /// Used before the tracing subscriber exists.
    pub fn resolution(&self) -> Resolution {
        let mut warnings = Vec::new();
        let toml_config = match self.locate_config_file() {
            Some(path) => match load_toml_config(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded TOML config");
                    config
                }
                Err(e) => {
                    warnings.push(format!("{}; using defaults", e));
                    TomlConfig::default()
                }
            },
            None => {
                debug!("No TOML config file found, using defaults");
                TomlConfig::default()
            }
        };

        let mut resolution = self.resolution_with(toml_config);
        warnings.append(&mut resolution.warnings);
        resolution.warnings = warnings;
        resolution
    }

    pub fn resolution_with(&self, toml_config: TomlConfig) -> Resolution {
        let defaults = CompiledDefaults::for_current_platform();
        let mut warnings = Vec::new();

        let api_base_url = self
            .cli_api_url
            .clone()
            .or_else(|| non_empty_env(ENV_API_URL))
            .or(toml_config.api_base_url)
            .unwrap_or(defaults.api_base_url);

        let data_folder = self
            .cli_data_folder
            .clone()
            .or_else(|| non_empty_env(ENV_DATA_FOLDER).map(PathBuf::from))
            .or(toml_config.data_folder)
            .unwrap_or(defaults.data_folder);

        let request_timeout_ms = positive_or_default(
            "request_timeout_ms",
            toml_config.request_timeout_ms,
            defaults.request_timeout_ms,
            &mut warnings,
        );
        let poll_interval_ms = positive_or_default(
            "poll_interval_ms",
            toml_config.poll_interval_ms,
            defaults.poll_interval_ms,
            &mut warnings,
        );
        let max_poll_failures = match toml_config.max_poll_failures {
            Some(0) => {
                warnings.push(format!(
                    "max_poll_failures must be at least 1, using default {}",
                    defaults.max_poll_failures
                ));
                defaults.max_poll_failures
            }
            Some(n) => n,
            None => defaults.max_poll_failures,
        };

        Resolution {
            config: ClientConfig {
                api_base_url: api_base_url.trim_end_matches('/').to_string(),
                data_folder,
                request_timeout: Duration::from_millis(request_timeout_ms),
                poll_interval: Duration::from_millis(poll_interval_ms),
                max_poll_failures,
                logging: toml_config.logging,
            },
            warnings,
        }
    }

    fn locate_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_file {
            return Some(path.clone());
        }
        if let Some(path) = non_empty_env(ENV_CONFIG_FILE) {
            return Some(PathBuf::from(path));
        }
        default_config_file()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn positive_or_default(
    name: &str,
    value: Option<u64>,
    default: u64,
    warnings: &mut Vec<String>,
) -> u64 {
    match value {
        Some(0) => {
            warnings.push(format!(
                "{} must be greater than zero, using default {}",
                name, default
            ));
            default
        }
        Some(v) => v,
        None => default,
    }
}

/// Platform config file location, if one exists
///
/// Linux tries `~/.config/fdash/config.toml` then `/etc/fdash/config.toml`.
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("fdash").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fdash/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}
