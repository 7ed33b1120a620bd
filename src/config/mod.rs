// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{ChatError, Result};
use config::{Config, Environment, File};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. CLI arguments (highest, applied by the caller)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        debug!("Loading configuration from {}", path.display());

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            // Load from config file if it exists
            .add_source(File::with_name(&path.to_string_lossy()).required(false))
            // Override with environment variables (e.g. DEEPCHAT_API__MODEL)
            .add_source(
                Environment::with_prefix("DEEPCHAT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Persist the configuration as TOML, creating the parent directory if needed.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;

        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        data_dir().join("config.toml")
    }
}
