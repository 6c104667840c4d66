//! Configuration loader
//!
//! Loads configuration from, in increasing priority:
//! 1. Default values
//! 2. A TOML file (`./checkpoint.toml` unless a path is given)
//! 3. `CHECKPOINT*` environment variables
//!
//! `${VAR:default}` references in string settings are expanded last, then the
//! result is validated.

use crate::config::schema::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Default config file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "checkpoint.toml";

/// Configuration loader
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: PathBuf,
    /// Fixed environment, replacing the process environment when set
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Loader for `./checkpoint.toml`
    pub fn new() -> Self {
        Self::with_path(DEFAULT_CONFIG_FILE)
    }

    /// Loader for an explicit config file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            env: None,
        }
    }

    /// Resolve environment lookups against `env` instead of the process
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    /// Load configuration with file and environment layered over defaults
    ///
    /// A missing file is not an error; an unreadable or malformed one is.
    pub async fn load(&self) -> Result<CheckpointConfig> {
        let mut config = if self.config_exists() {
            let config = self.load_from_path(&self.config_path).await?;
            debug!(path = %self.config_path.display(), "Loaded checkpoint config file");
            config
        } else {
            debug!(path = %self.config_path.display(), "Config file not found, using defaults");
            CheckpointConfig::default()
        };

        config.apply_env_overrides(|name| self.lookup(name))?;
        config.resolve_env_vars(|name| self.lookup(name));
        config.validate()?;

        info!(
            enabled = config.checkpoints_enabled,
            sync_to_durable_store = config.sync_to_durable_store,
            "Checkpoint configuration loaded"
        );
        Ok(config)
    }

    /// Parse one config file
    async fn load_from_path(&self, path: &Path) -> Result<CheckpointConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CheckpointError::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| CheckpointError::Config(format!("Failed to parse config: {}", e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
