//! Storage-tier traits for checkpoint persistence
//!
//! The checkpoint core talks to two heterogeneous collaborators:
//!
//! - **[`KeyValueCache`]** - the fast tier. A namespaced key-value store with
//!   per-key TTL, pattern scans and pipelined batch writes (Redis-shaped). Values
//!   are opaque bytes; the cache service above it owns encoding and validation.
//! - **[`DocumentStore`]** - the durable tier. An indexed collection of JSON
//!   documents supporting find-with-sort, insert, upsert-replace and
//!   delete-many-by-predicate (MongoDB-shaped).
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │        checkpoint-core (CheckpointManager)             │
//! └───────────────┬───────────────────────┬────────────────┘
//!                 │ hot path              │ step boundaries,
//!                 ▼                       ▼ job resolution, TTL sweep
//!        ┌─────────────────┐     ┌──────────────────┐
//!        │  KeyValueCache  │     │  DocumentStore   │
//!        └───────┬─────────┘     └───────┬──────────┘
//!                │                       │
//!        ┌───────┴────────┐     ┌────────┴───────────────┐
//!        │ InMemoryKeyVal │     │ InMemoryDocumentStore  │
//!        │ ueCache        │     │ SqliteDocumentStore    │
//!        └────────────────┘     └────────────────────────┘
//! ```
//!
//! # Implementing a Backend
//!
//! Both traits are object safe and are used as `Arc<dyn ...>` so one connection
//! can be shared by every concurrent job. Implementations must be `Send + Sync`
//! and must not hold locks across their own awaits longer than one operation.
//!
//! ```rust,ignore
//! use checkpoint_store::{KeyValueCache, Result};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct RedisCache {
//!     client: redis::Client,
//! }
//!
//! #[async_trait]
//! impl KeyValueCache for RedisCache {
//!     async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
//!         let mut conn = self.client.get_multiplexed_async_connection().await?;
//!         // SET key value EX ttl
//!         ...
//!         Ok(())
//!     }
//!     // ...
//! }
//! ```
//!
//! # Error Handling
//!
//! Backends surface connection and query failures as [`StoreError`](crate::StoreError);
//! the core propagates them verbatim without retrying.

use crate::error::Result;
use crate::query::{Filter, FindOptions, IndexSpec, ReplaceOutcome};
use async_trait::async_trait;
use std::time::Duration;

/// A durable-store document: a JSON object keyed by field name
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Fast-tier key-value store with per-key TTL
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Fetch raw bytes; `None` when absent or physically expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes, replacing any previous value and resetting its TTL
    ///
    /// # Arguments
    ///
    /// * `key` - Fully namespaced key
    /// * `value` - Encoded payload
    /// * `ttl` - Time-to-live (None = no expiration)
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Whether a live key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining time-to-live of a key, `None` when absent or persistent
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// List live keys matching a glob pattern (`*` matches any run of characters)
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Delete many keys at once; returns how many existed
    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Pipelined batch write sharing one TTL
    ///
    /// The default issues one `set` per entry; backends with native pipelining
    /// should override it.
    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }
}

/// Durable-tier indexed document collection
///
/// Documents carry a store-internal identity under
/// [`STORE_ID_FIELD`](crate::checkpoint::STORE_ID_FIELD), assigned on insert.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a secondary index if it does not already exist
    async fn ensure_index(&self, index: &IndexSpec) -> Result<()>;

    /// Find documents matching `filter`, sorted and limited per `options`
    async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>>;

    /// First document in `options` order matching `filter`
    async fn find_one(&self, filter: &Filter, options: &FindOptions) -> Result<Option<Document>> {
        let options = options.clone().limit(1);
        Ok(self.find(filter, &options).await?.into_iter().next())
    }

    /// Insert a new document; returns the assigned store identity
    async fn insert(&self, document: Document) -> Result<String>;

    /// Replace the first document matching `filter` wholesale
    ///
    /// The stored identity of a replaced document is preserved. With `upsert`,
    /// a missing document is inserted instead, which makes repeated replaces
    /// idempotent.
    async fn replace_one(
        &self,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome>;

    /// Delete every document matching `filter`; returns how many were removed
    async fn delete_many(&self, filter: &Filter) -> Result<u64>;
}
