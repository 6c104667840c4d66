//! # checkpoint-store - Checkpoint Model and Storage Tiers
//!
//! **Data model, schema validation and storage-tier abstractions** for resumable
//! multi-step scrape jobs. This crate knows what a checkpoint looks like and how to
//! talk to the two tiers it lives in; the orchestration that decides *when* to
//! write where lives in `checkpoint-core`.
//!
//! ## Overview
//!
//! A scrape job runs a fixed four-step pipeline:
//!
//! 1. **Discovery** - find main categories
//! 2. **Category expansion** - find subcategories
//! 3. **URL collection** - enumerate product URLs
//! 4. **Extraction** - pull product data
//!
//! After each step the job's [`Checkpoint`] records how far it got. Checkpoints are
//! kept in a fast, volatile tier (every write) and a slower durable tier (step
//! boundaries only), so a crashed or restarted job can pick up where it left off.
//!
//! ## Core Concepts
//!
//! ### 1. Checkpoint Records
//!
//! - [`Checkpoint`] - the full snapshot
//! - [`CheckpointStub`] - what the fast tier keeps when a snapshot is too large
//! - [`CheckpointRecord`] - either of the two, as returned by fast-tier operations
//!
//! ### 2. Validation
//!
//! [`validation::validate`] is applied at every tier crossing. It collects every
//! violation into one [`ValidationError`], applies defaults, and yields a typed
//! [`Checkpoint`].
//!
//! ### 3. Storage Tiers
//!
//! - [`KeyValueCache`] - fast tier with per-key TTL
//! - [`DocumentStore`] - durable tier with indexes, sorted finds and upserts
//!
//! Backends shipped here:
//!
//! | Tier    | Backend                   | Use                          |
//! |---------|---------------------------|------------------------------|
//! | fast    | [`InMemoryKeyValueCache`] | tests, single-process tools  |
//! | durable | [`InMemoryDocumentStore`] | tests                        |
//! | durable | [`SqliteDocumentStore`]   | local and single-node setups |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use checkpoint_store::{
//!     DocumentStore, Filter, FindOptions, SortOrder, SqliteDocumentStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteDocumentStore::connect("checkpoints.db", "checkpoints", 5).await?;
//!
//!     let latest = store
//!         .find_one(
//!             &Filter::eq("job_id", "job-42"),
//!             &FindOptions::new().sort_by("created_at", SortOrder::Desc),
//!         )
//!         .await?;
//!     println!("latest checkpoint document: {:?}", latest);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`checkpoint`] - record types, enumerations and timestamp format
//! - [`validation`] - schema validation and per-tier preparation
//! - [`traits`] - [`KeyValueCache`] and [`DocumentStore`]
//! - [`query`] - filters, sort orders and index definitions
//! - [`memory`] - in-memory backends
//! - [`sqlite`] - SQLite durable backend
//! - [`serializer`] - fast-tier byte encoding
//! - [`clock`] - injectable time source
//! - [`error`] - [`StoreError`]

pub mod checkpoint;
pub mod clock;
pub mod error;
pub mod memory;
pub mod query;
pub mod serializer;
pub mod sqlite;
pub mod traits;
pub mod validation;

// Re-export main types
pub use checkpoint::{
    Checkpoint, CheckpointRecord, CheckpointStatus, CheckpointStub, ErrorDetails, JobType,
    PipelineData, MAX_PIPELINE_STEP, MIN_PIPELINE_STEP,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StoreError};
pub use memory::{InMemoryDocumentStore, InMemoryKeyValueCache};
pub use query::{Filter, FindOptions, IndexSpec, ReplaceOutcome, SortOrder};
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use sqlite::SqliteDocumentStore;
pub use traits::{Document, DocumentStore, KeyValueCache};
pub use validation::{FieldError, ValidationError};
