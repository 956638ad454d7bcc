//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration only: where the data lives, how to reach the photo
//! search service, how often to autosave, and how loudly to log.
//!
//! # Root folder priority
//!
//! 1. Explicit override (embedding application or tests)
//! 2. `VT_ROOT_FOLDER` environment variable
//! 3. `root_folder` in the TOML config file
//! 4. OS-dependent default under the local data directory
//!
//! The database file name inside the root folder is fixed.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "VT_ROOT_FOLDER";

/// Environment variable overriding the Flickr API key
pub const API_KEY_ENV: &str = "VT_FLICKR_API_KEY";

/// Application directory name under the platform data/config directories
pub const APP_DIR_NAME: &str = "virtual-tourist";

/// Object store file inside the root folder
pub const DATABASE_FILE_NAME: &str = "model.sqlite";

/// Persisted app state (first launch flag, map region) inside the root folder
pub const STATE_FILE_NAME: &str = "state.toml";

const DEFAULT_API_BASE_URL: &str = "https://api.flickr.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 60;

/// Bootstrap configuration loaded from `config.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the object store and app state (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Photo search service settings
    #[serde(default)]
    pub flickr: FlickrConfig,

    /// Seconds between periodic saves; 0 disables autosave
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Photo search service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FlickrConfig {
    /// API key sent with every request
    #[serde(default)]
    pub api_key: String,

    /// Scheme and host of the REST endpoint, without the `/services/rest` path
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_autosave_interval_secs() -> u64 {
    DEFAULT_AUTOSAVE_INTERVAL_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FlickrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FlickrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            flickr: FlickrConfig::default(),
            autosave_interval_secs: default_autosave_interval_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Load from the platform config file, falling back to defaults
    ///
    /// A missing or unreadable file is not fatal: a warning is logged and the
    /// built-in defaults are used. Environment overrides are applied last.
    pub fn load() -> Self {
        let config = match default_config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Some(path) => {
                warn!(
                    "Config file not found at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
            None => {
                warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    /// Load and parse a specific TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                debug!("Using Flickr API key from {}", API_KEY_ENV);
                self.flickr.api_key = key;
            }
        }
        self
    }

    /// Autosave period, `None` when disabled
    pub fn autosave_interval(&self) -> Option<Duration> {
        match self.autosave_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Resolves the root folder following the documented priority order
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    explicit: Option<PathBuf>,
    from_toml: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest priority override
    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Use the `root_folder` key of a loaded config
    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.from_toml = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.explicit {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.from_toml {
            return path.clone();
        }

        default_root_folder()
    }
}

/// Creates the root folder and names the files inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            info!("Created root folder: {}", self.root.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE_NAME)
    }
}

/// Platform config file: `<config dir>/virtual-tourist/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/virtual-tourist
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/var/lib/virtual-tourist"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/virtual-tourist
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/virtual-tourist"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\virtual-tourist
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\virtual-tourist"))
    } else {
        PathBuf::from("./virtual_tourist_data")
    }
}
