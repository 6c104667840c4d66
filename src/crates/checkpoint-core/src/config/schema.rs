//! Configuration schema for the checkpoint subsystem

use crate::error::{CheckpointError, Result};
use checkpoint_store::checkpoint::DEFAULT_DURABLE_TTL_DAYS;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

/// Sliding fast-tier lifetime, reset on every write
pub const FAST_TIER_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// Default fast-tier payload ceiling (512 KiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE_BYTES: usize = 512 * 1024;

static ENV_REF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").unwrap());

/// Checkpoint subsystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Master switch; when off every manager operation is a no-op
    pub checkpoints_enabled: bool,

    /// Serialized size above which the fast tier keeps a stub instead
    pub max_payload_size_bytes: usize,

    /// Mirror step-boundary progress into the durable store
    pub sync_to_durable_store: bool,

    /// Durable-tier lifetime of a checkpoint, from creation
    pub durable_ttl_days: u32,

    /// Delete fast-tier entries that fail validation on read
    pub delete_on_corruption: bool,

    /// Fast-tier key prefix
    pub namespace: String,

    /// How often the expiry sweeper runs
    pub sweep_interval_secs: u64,

    /// Durable store connection
    pub durable: DurableConfig,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoints_enabled: false,
            max_payload_size_bytes: DEFAULT_MAX_PAYLOAD_SIZE_BYTES,
            sync_to_durable_store: true,
            durable_ttl_days: DEFAULT_DURABLE_TTL_DAYS as u32,
            delete_on_corruption: true,
            namespace: "checkpoint".to_string(),
            sweep_interval_secs: 3600,
            durable: DurableConfig::default(),
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    /// SQLite database file (supports `${VAR:default}` interpolation)
    pub database_path: String,

    /// Collection (table) holding checkpoint documents
    pub collection: String,

    pub max_connections: u32,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            database_path: "checkpoints.db".to_string(),
            collection: "checkpoints".to_string(),
            max_connections: 5,
        }
    }
}

impl CheckpointConfig {
    /// Configuration with the subsystem switched on
    pub fn enabled() -> Self {
        Self {
            checkpoints_enabled: true,
            ..Self::default()
        }
    }

    pub fn durable_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.durable_ttl_days))
    }

    pub fn fast_tier_ttl(&self) -> Duration {
        FAST_TIER_TTL
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject settings the subsystem cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size_bytes == 0 {
            return Err(CheckpointError::Config(
                "max_payload_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.durable_ttl_days == 0 {
            return Err(CheckpointError::Config(
                "durable_ttl_days must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(CheckpointError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.namespace.is_empty() || self.namespace.contains('*') {
            return Err(CheckpointError::Config(format!(
                "invalid namespace '{}'",
                self.namespace
            )));
        }
        if self.durable.max_connections == 0 {
            return Err(CheckpointError::Config(
                "durable.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `CHECKPOINT*` environment overrides
    ///
    /// `lookup` resolves a variable name; the loader passes the process
    /// environment, tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("CHECKPOINTS_ENABLED") {
            self.checkpoints_enabled = parse_bool("CHECKPOINTS_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("CHECKPOINT_MAX_PAYLOAD_BYTES") {
            self.max_payload_size_bytes = parse_number("CHECKPOINT_MAX_PAYLOAD_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("CHECKPOINT_SYNC_DURABLE") {
            self.sync_to_durable_store = parse_bool("CHECKPOINT_SYNC_DURABLE", &raw)?;
        }
        if let Some(raw) = lookup("CHECKPOINT_DURABLE_TTL_DAYS") {
            self.durable_ttl_days = parse_number("CHECKPOINT_DURABLE_TTL_DAYS", &raw)?;
        }
        if let Some(raw) = lookup("CHECKPOINT_DELETE_ON_CORRUPTION") {
            self.delete_on_corruption = parse_bool("CHECKPOINT_DELETE_ON_CORRUPTION", &raw)?;
        }
        if let Some(raw) = lookup("CHECKPOINT_DB_PATH") {
            self.durable.database_path = raw;
        }
        Ok(())
    }

    /// Expand `${VAR}` and `${VAR:default}` references in string settings
    pub fn resolve_env_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.durable.database_path = expand_env_refs(&self.durable.database_path, &lookup);
        self.durable.collection = expand_env_refs(&self.durable.collection, &lookup);
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CheckpointError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| CheckpointError::Config(format!("{} must be a number, got '{}'", name, raw)))
}

fn expand_env_refs<F>(value: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !value.contains("${") {
        return value.to_string();
    }

    ENV_REF_REGEX
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            lookup(&caps[1]).unwrap_or_else(|| default.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CheckpointConfig::default();
        assert!(!config.checkpoints_enabled);
        assert_eq!(config.max_payload_size_bytes, 524_288);
        assert!(config.sync_to_durable_store);
        assert_eq!(config.durable_ttl(), chrono::Duration::days(7));
        assert!(config.delete_on_corruption);
        assert_eq!(config.fast_tier_ttl(), Duration::from_secs(172_800));
        assert_eq!(config.durable.collection, "checkpoints");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: CheckpointConfig = toml::from_str(
            r#"
            checkpoints_enabled = true
            durable_ttl_days = 14

            [durable]
            database_path = "/var/lib/scraper/checkpoints.db"
            "#,
        )
        .unwrap();

        assert!(config.checkpoints_enabled);
        assert_eq!(config.durable_ttl_days, 14);
        assert_eq!(config.max_payload_size_bytes, DEFAULT_MAX_PAYLOAD_SIZE_BYTES);
        assert_eq!(config.durable.database_path, "/var/lib/scraper/checkpoints.db");
        assert_eq!(config.durable.max_connections, 5);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CheckpointConfig::default();
        config
            .apply_env_overrides(env(&[
                ("CHECKPOINTS_ENABLED", "true"),
                ("CHECKPOINT_MAX_PAYLOAD_BYTES", "1024"),
                ("CHECKPOINT_SYNC_DURABLE", "0"),
                ("CHECKPOINT_DB_PATH", "/tmp/cp.db"),
            ]))
            .unwrap();

        assert!(config.checkpoints_enabled);
        assert_eq!(config.max_payload_size_bytes, 1024);
        assert!(!config.sync_to_durable_store);
        assert_eq!(config.durable.database_path, "/tmp/cp.db");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = CheckpointConfig::default();
        let err = config
            .apply_env_overrides(env(&[("CHECKPOINT_DURABLE_TTL_DAYS", "a week")]))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Config(_)));
    }

    #[test]
    fn test_env_var_expansion() {
        let mut config = CheckpointConfig::default();
        config.durable.database_path = "${DATA_DIR:/var/lib}/checkpoints.db".to_string();

        config.resolve_env_vars(env(&[]));
        assert_eq!(config.durable.database_path, "/var/lib/checkpoints.db");

        config.durable.database_path = "${DATA_DIR:/var/lib}/checkpoints.db".to_string();
        config.resolve_env_vars(env(&[("DATA_DIR", "/srv")]));
        assert_eq!(config.durable.database_path, "/srv/checkpoints.db");
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut config = CheckpointConfig::default();
        config.max_payload_size_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = CheckpointConfig::default();
        config.durable_ttl_days = 0;
        assert!(config.validate().is_err());

        let mut config = CheckpointConfig::default();
        config.namespace = "checkpoint*".to_string();
        assert!(config.validate().is_err());
    }
}
