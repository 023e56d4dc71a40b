//! Bootstrap configuration loading and root folder resolution
//!
//! Priority order for the root folder (where the database lives):
//! 1. Command-line argument (highest priority)
//! 2. `TCV_ROOT_FOLDER` environment variable
//! 3. `root_folder` key of the TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! Priority order for the TOML config file itself:
//! 1. Command-line argument
//! 2. `TCV_CONFIG` environment variable
//! 3. `<config_dir>/tcv/<module>.toml`
//!
//! A missing config file is not an error: callers fall back to defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "TCV_ROOT_FOLDER";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "TCV_CONFIG";

/// Logging configuration (`[logging]` table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (e.g. "info", "tcv_engine=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
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

/// Resolves the root folder for one module
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml_root(mut self, path: Option<PathBuf>) -> Self {
        self.toml_root = path;
        self
    }

    /// Resolve the root folder, never failing
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, "Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, "Root folder from TOML config: {}", path.display());
            return path.clone();
        }

        let path = default_root_folder();
        info!(module = %self.module_name, "Root folder from compiled default: {}", path.display());
        path
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tcv"))
        .unwrap_or_else(|| PathBuf::from("./tcv_data"))
}

/// Locate the TOML config file for `module_name`, if any exists
pub fn resolve_config_path(module_name: &str, cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir()?.join("tcv").join(format!("{}.toml", module_name));
    user_config.exists().then_some(user_config)
}

/// Load a TOML config file, falling back to `T::default()` when the file is absent
///
/// A file that exists but fails to parse is an error: silently ignoring a
/// broken config would run the service with settings nobody asked for.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file {} does not exist, using built-in defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config file {}", path.display());
    Ok(config)
}

/// Database path inside the root folder, creating the folder when missing
pub fn ensure_database_path(root_folder: &Path, file_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(root_folder)?;
    Ok(root_folder.join(file_name))
}
