//! # checkpoint-core - Checkpoint & Resume for Long-Running Scrape Jobs
//!
//! Records a job's pipeline progress across a fast volatile tier and a durable
//! store, and tells a restarted job where to pick up.
//!
//! ## Components
//!
//! - [`CheckpointCacheService`] - validated, size-bounded, self-healing façade
//!   over the fast tier
//! - [`CheckpointManager`] - the entry point for pipeline workers: selective
//!   write-through, job resolution, failure marking, expiry sweep
//! - [`ResumePoint`] - the resume decision for a job
//! - [`spawn_expiry_sweeper`] - periodic durable-store TTL sweep
//! - [`config`] - [`CheckpointConfig`] and its TOML/env loader
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use checkpoint_core::{CheckpointConfig, CheckpointManager};
//! use checkpoint_store::{InMemoryKeyValueCache, SqliteDocumentStore, SystemClock};
//! use serde_json::{json, Map};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CheckpointConfig::enabled();
//!     let durable = SqliteDocumentStore::connect("checkpoints.db", "checkpoints", 5).await?;
//!     let manager = CheckpointManager::with_backends(
//!         config,
//!         Arc::new(InMemoryKeyValueCache::new()),
//!         Arc::new(durable),
//!         Arc::new(SystemClock),
//!     );
//!     manager.ensure_indexes().await?;
//!
//!     let resume = manager.get_resume_point("job-42").await?;
//!     if let Some(point) = resume.filter(|p| p.can_resume) {
//!         println!("resuming job-42 at step {}", point.start_step);
//!     } else if let Some(checkpoint) = manager
//!         .create_checkpoint("job-42", "shop.example.com", Map::new())
//!         .await?
//!     {
//!         let mut found = Map::new();
//!         found.insert("urls_discovered".into(), json!(["/a", "/b"]));
//!         manager
//!             .save_progress(checkpoint.checkpoint_id, 1, found, true)
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache_service;
pub mod config;
pub mod error;
pub mod manager;
pub mod resume;
pub mod sweeper;

pub use cache_service::{BatchWrite, CacheStats, CheckpointCacheService};
pub use config::{CheckpointConfig, ConfigLoader, DurableConfig, FAST_TIER_TTL};
pub use error::{CheckpointError, Result};
pub use manager::{durable_indexes, CheckpointManager, ManagerStats};
pub use resume::ResumePoint;
pub use sweeper::spawn_expiry_sweeper;
