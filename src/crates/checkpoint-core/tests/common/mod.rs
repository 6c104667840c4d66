//! Common test utilities and setup
//!
//! Recording collaborators wrap the in-memory backends and count every call, so
//! tests can assert which tiers an operation touched.

#![allow(dead_code)]

use async_trait::async_trait;
use checkpoint_core::{CheckpointConfig, CheckpointManager};
use checkpoint_store::{
    Document, DocumentStore, Filter, FindOptions, InMemoryDocumentStore, InMemoryKeyValueCache,
    IndexSpec, KeyValueCache, ManualClock, ReplaceOutcome, StoreError,
};
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fast tier that counts calls
#[derive(Debug, Default)]
pub struct RecordingCache {
    pub inner: InMemoryKeyValueCache,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub deletes: AtomicUsize,
    pub other: AtomicUsize,
}

impl RecordingCache {
    pub fn calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
            + self.sets.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.other.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueCache for RecordingCache {
    async fn get(&self, key: &str) -> checkpoint_store::Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> checkpoint_store::Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> checkpoint_store::Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> checkpoint_store::Result<bool> {
        self.other.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key).await
    }

    async fn ttl(&self, key: &str) -> checkpoint_store::Result<Option<Duration>> {
        self.other.fetch_add(1, Ordering::SeqCst);
        self.inner.ttl(key).await
    }

    async fn scan(&self, pattern: &str) -> checkpoint_store::Result<Vec<String>> {
        self.other.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(pattern).await
    }
}

/// Durable store that counts calls and can be told to fail writes
#[derive(Debug, Default)]
pub struct RecordingStore {
    pub inner: InMemoryDocumentStore,
    pub finds: AtomicUsize,
    pub inserts: AtomicUsize,
    pub replaces: AtomicUsize,
    pub deletes: AtomicUsize,
    pub indexes: AtomicUsize,
    pub fail_writes: AtomicBool,
}

impl RecordingStore {
    pub fn calls(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
            + self.inserts.load(Ordering::SeqCst)
            + self.replaces.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.indexes.load(Ordering::SeqCst)
    }

    pub fn replaces(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> checkpoint_store::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Connection("durable store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// The stored document for a checkpoint id, bypassing the counters
    pub async fn document(&self, checkpoint_id: &str) -> Option<Document> {
        self.inner
            .find_one(&Filter::eq("checkpoint_id", checkpoint_id), &FindOptions::new())
            .await
            .unwrap()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn ensure_index(&self, index: &IndexSpec) -> checkpoint_store::Result<()> {
        self.indexes.fetch_add(1, Ordering::SeqCst);
        self.inner.ensure_index(index).await
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> checkpoint_store::Result<Vec<Document>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(filter, options).await
    }

    async fn insert(&self, document: Document) -> checkpoint_store::Result<String> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.inner.insert(document).await
    }

    async fn replace_one(
        &self,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> checkpoint_store::Result<ReplaceOutcome> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.inner.replace_one(filter, document, upsert).await
    }

    async fn delete_many(&self, filter: &Filter) -> checkpoint_store::Result<u64> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.inner.delete_many(filter).await
    }
}

/// A manager wired to recording collaborators and a manual clock
///
/// The manager is shared so tests can hand it to spawned tasks.
pub struct TestHarness {
    pub manager: Arc<CheckpointManager>,
    pub cache: Arc<RecordingCache>,
    pub store: Arc<RecordingStore>,
    pub clock: ManualClock,
}

impl TestHarness {
    pub fn new(config: CheckpointConfig) -> Self {
        let cache = Arc::new(RecordingCache::default());
        let store = Arc::new(RecordingStore::default());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());

        let manager = Arc::new(CheckpointManager::with_backends(
            config,
            cache.clone(),
            store.clone(),
            Arc::new(clock.clone()),
        ));

        Self {
            manager,
            cache,
            store,
            clock,
        }
    }

    /// Checkpoints on, durable sync on
    pub fn enabled() -> Self {
        Self::new(CheckpointConfig::enabled())
    }

    /// Fast-tier key for a checkpoint id
    pub fn key(&self, checkpoint_id: impl std::fmt::Display) -> String {
        format!("checkpoint:{}", checkpoint_id)
    }
}

/// Build a JSON object from a `json!` literal
pub fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}
