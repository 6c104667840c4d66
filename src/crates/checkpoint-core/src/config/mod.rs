//! Configuration management for the checkpoint subsystem
//!
//! Defaults, then `checkpoint.toml`, then `CHECKPOINT*` environment variables.

mod loader;
mod schema;

pub use loader::{ConfigLoader, DEFAULT_CONFIG_FILE};
pub use schema::{
    CheckpointConfig, DurableConfig, DEFAULT_MAX_PAYLOAD_SIZE_BYTES, FAST_TIER_TTL,
};

use crate::Result;

/// Load configuration from `./checkpoint.toml` and the process environment
pub async fn load_config() -> Result<CheckpointConfig> {
    ConfigLoader::new().load().await
}
