//! In-memory storage tiers for development and testing
//!
//! This module provides reference implementations of both collaborator traits:
//!
//! - **[`InMemoryKeyValueCache`]** - fast tier with per-key TTL. Expiry is lazy
//!   (checked on access) and measured with `tokio::time::Instant`, so tests can
//!   pause and advance the clock instead of sleeping.
//! - **[`InMemoryDocumentStore`]** - durable tier holding documents in insertion
//!   order, evaluating [`Filter`]s and [`FindOptions`] directly.
//!
//! Both are cheap to clone; clones share the same underlying data, so one
//! instance can be handed to several services in a test.
//!
//! # When to Use
//!
//! **Use in-memory tiers for:**
//! - Unit and integration tests
//! - Single-process tools that only need the durable tier (the CLI wires an
//!   empty in-memory fast tier in front of SQLite)
//!
//! **Avoid for:**
//! - Anything that must survive a restart
//! - Multi-process deployments
//!
//! # Example
//!
//! ```rust
//! use checkpoint_store::{InMemoryKeyValueCache, KeyValueCache};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = InMemoryKeyValueCache::new();
//!     cache.set("checkpoint:abc", b"{}".to_vec(), Some(Duration::from_secs(60))).await?;
//!     assert!(cache.exists("checkpoint:abc").await?);
//!     Ok(())
//! }
//! ```

use crate::{
    checkpoint::STORE_ID_FIELD,
    error::{Result, StoreError},
    query::{Filter, FindOptions, IndexSpec, ReplaceOutcome, SortOrder},
    traits::{Document, DocumentStore, KeyValueCache},
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// Compile a `*`-glob into an anchored regex
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| StoreError::InvalidQuery(format!("invalid scan pattern '{}': {}", pattern, e)))
}

/// In-memory fast tier with lazy TTL expiry
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueCache {
    data: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryKeyValueCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including expired ones not yet evicted
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the cache holds no keys at all
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Drop every key (useful for test isolation)
    pub async fn clear(&self) {
        self.data.write().await.clear();
    }
}

#[async_trait]
impl KeyValueCache for InMemoryKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut data = self.data.write().await;

        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.data.write().await.remove(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().await;

        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let data = self.data.read().await;

        Ok(data
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| entry.expires_at)
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now())))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let data = self.data.read().await;

        let mut keys: Vec<String> = data
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut data = self.data.write().await;

        Ok(keys
            .iter()
            .filter_map(|key| data.remove(key))
            .filter(|entry| !entry.is_expired())
            .count())
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        let mut data = self.data.write().await;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        for (key, value) in entries {
            data.insert(key, CacheEntry { value, expires_at });
        }
        Ok(())
    }
}

/// In-memory durable tier
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<Vec<Document>>>,
    indexes: Arc<RwLock<Vec<IndexSpec>>>,
}

impl InMemoryDocumentStore {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Indexes created through [`DocumentStore::ensure_index`]
    pub async fn indexes(&self) -> Vec<IndexSpec> {
        self.indexes.read().await.clone()
    }

    /// Remove every document
    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }
}

fn assign_store_id(document: &mut Document) -> String {
    match document.get(STORE_ID_FIELD).and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            document.insert(STORE_ID_FIELD.to_string(), Value::from(id.clone()));
            id
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn ensure_index(&self, index: &IndexSpec) -> Result<()> {
        for (field, _) in &index.fields {
            crate::query::validate_field(field)?;
        }

        let mut indexes = self.indexes.write().await;
        if !indexes.iter().any(|existing| existing.name == index.name) {
            indexes.push(index.clone());
        }
        Ok(())
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        filter.validate_fields()?;
        let documents = self.documents.read().await;

        let mut matches: Vec<(usize, &Document)> = documents
            .iter()
            .enumerate()
            .filter(|(_, document)| filter.matches(document))
            .collect();
        let tie_break = options.tie_break();
        matches.sort_by(|(i, a), (j, b)| {
            options.compare(a, b).then_with(|| match tie_break {
                SortOrder::Asc => i.cmp(j),
                SortOrder::Desc => j.cmp(i),
            })
        });
        if let Some(limit) = options.limit {
            matches.truncate(limit);
        }
        Ok(matches.into_iter().map(|(_, document)| document.clone()).collect())
    }

    async fn insert(&self, mut document: Document) -> Result<String> {
        let id = assign_store_id(&mut document);
        self.documents.write().await.push(document);
        Ok(id)
    }

    async fn replace_one(
        &self,
        filter: &Filter,
        mut document: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome> {
        filter.validate_fields()?;
        let mut documents = self.documents.write().await;

        if let Some(existing) = documents.iter_mut().find(|existing| filter.matches(existing)) {
            if let Some(id) = existing.get(STORE_ID_FIELD).cloned() {
                document.insert(STORE_ID_FIELD.to_string(), id);
            }
            *existing = document;
            return Ok(ReplaceOutcome::Replaced);
        }

        if !upsert {
            return Ok(ReplaceOutcome::NotFound);
        }

        document.remove(STORE_ID_FIELD);
        assign_store_id(&mut document);
        documents.push(document);
        Ok(ReplaceOutcome::Upserted)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        filter.validate_fields()?;
        let mut documents = self.documents.write().await;

        let before = documents.len();
        documents.retain(|document| !filter.matches(document));
        Ok((before - documents.len()) as u64)
    }
}
