//! Validated, size-bounded fast-tier façade
//!
//! [`CheckpointCacheService`] sits between the manager and a raw
//! [`KeyValueCache`]. It adds what the raw cache lacks:
//!
//! - **Validation** - every record is validated on write and again on read
//! - **Size policing** - payloads over the budget are replaced by a stub
//! - **Self-healing** - entries that no longer validate are deleted and read as absent
//! - **Logical expiry** - entries past `expires_at` are deleted on read even if
//!   the physical TTL has not elapsed
//!
//! Keys are `{namespace}:{id}`; every successful write resets the 48 hour
//! sliding TTL.
//!
//! # Example
//!
//! ```rust
//! use checkpoint_core::{CheckpointCacheService, CheckpointConfig};
//! use checkpoint_store::{InMemoryKeyValueCache, SystemClock};
//! use std::sync::Arc;
//!
//! let service = CheckpointCacheService::new(
//!     Arc::new(InMemoryKeyValueCache::new()),
//!     &CheckpointConfig::default(),
//!     Arc::new(SystemClock),
//! );
//! assert_eq!(service.key("abc"), "checkpoint:abc");
//! ```

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use checkpoint_store::{
    checkpoint::{timestamp, OVERSIZED_FIELD},
    validation, Checkpoint, CheckpointRecord, CheckpointStub, Clock, JsonSerializer,
    KeyValueCache, SerializerProtocol,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters kept by the cache service
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    oversized: AtomicU64,
    corrupted: AtomicU64,
    expired: AtomicU64,
    deletes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of cache service activity
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that returned a record
    pub hits: u64,
    /// Reads that returned nothing, including corrupted and expired entries
    pub misses: u64,
    pub writes: u64,
    /// Writes degraded to a stub
    pub oversized: u64,
    /// Entries that failed validation on read
    pub corrupted: u64,
    /// Entries found past their logical expiry
    pub expired: u64,
    pub deletes: u64,
    /// Live keys under the namespace
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of a batch write; one bad record never fails the others
#[derive(Debug, Default)]
pub struct BatchWrite {
    pub written: Vec<(String, CheckpointRecord)>,
    pub failed: Vec<(String, CheckpointError)>,
}

/// Fast-tier checkpoint cache
///
/// One instance is shared by every concurrent job; it holds only counters.
pub struct CheckpointCacheService {
    cache: Arc<dyn KeyValueCache>,
    serializer: JsonSerializer,
    clock: Arc<dyn Clock>,
    namespace: String,
    max_payload_size_bytes: usize,
    fast_tier_ttl: Duration,
    delete_on_corruption: bool,
    counters: Counters,
}

impl std::fmt::Debug for CheckpointCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointCacheService")
            .field("namespace", &self.namespace)
            .field("max_payload_size_bytes", &self.max_payload_size_bytes)
            .field("fast_tier_ttl", &self.fast_tier_ttl)
            .field("delete_on_corruption", &self.delete_on_corruption)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl CheckpointCacheService {
    pub fn new(cache: Arc<dyn KeyValueCache>, config: &CheckpointConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            serializer: JsonSerializer::new(),
            clock,
            namespace: config.namespace.clone(),
            max_payload_size_bytes: config.max_payload_size_bytes,
            fast_tier_ttl: config.fast_tier_ttl(),
            delete_on_corruption: config.delete_on_corruption,
            counters: Counters::default(),
        }
    }

    /// Namespaced fast-tier key for an id
    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.namespace, id)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Validate, size-check and store a record
    ///
    /// Returns the full checkpoint, or the stub that was stored instead when the
    /// encoded record exceeds the payload budget.
    pub async fn set(&self, id: &str, data: &Value) -> Result<CheckpointRecord> {
        let checkpoint = validation::validate(data, self.clock.now())?;
        let (record, bytes) = self.encode(checkpoint)?;

        self.cache.set(&self.key(id), bytes, Some(self.fast_tier_ttl)).await?;
        Counters::bump(&self.counters.writes);
        debug!(checkpoint_id = %id, oversized = record.is_oversized(), "Checkpoint cached");
        Ok(record)
    }

    /// Store a typed checkpoint (still validated)
    pub async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> Result<CheckpointRecord> {
        let data = serde_json::to_value(checkpoint)?;
        self.set(&checkpoint.checkpoint_id.to_string(), &data).await
    }

    /// Serialize, degrading to a stub above the budget
    fn encode(&self, checkpoint: Checkpoint) -> Result<(CheckpointRecord, Vec<u8>)> {
        let bytes = self.serializer.dumps(&checkpoint)?;
        if bytes.len() <= self.max_payload_size_bytes {
            return Ok((CheckpointRecord::Full(checkpoint), bytes));
        }

        warn!(
            checkpoint_id = %checkpoint.checkpoint_id,
            size = bytes.len(),
            budget = self.max_payload_size_bytes,
            "Checkpoint payload over budget, caching stub only"
        );
        Counters::bump(&self.counters.oversized);

        let stub = checkpoint.to_stub();
        let bytes = self.serializer.dumps(&stub)?;
        Ok((CheckpointRecord::Oversized(stub), bytes))
    }

    /// Fetch a record
    ///
    /// Absent, corrupted and logically expired entries all read as `None`.
    pub async fn get(&self, id: &str) -> Result<Option<CheckpointRecord>> {
        let key = self.key(id);
        let Some(bytes) = self.cache.get(&key).await? else {
            Counters::bump(&self.counters.misses);
            debug!(checkpoint_id = %id, "Checkpoint cache miss");
            return Ok(None);
        };

        let value = match self.serializer.loads_value(&bytes) {
            Ok(value) => value,
            Err(e) => return self.discard_corrupted(id, &key, &e.to_string()).await,
        };

        if value.get(OVERSIZED_FIELD).and_then(Value::as_bool) == Some(true) {
            return match serde_json::from_value::<CheckpointStub>(value) {
                Ok(stub) => {
                    Counters::bump(&self.counters.hits);
                    Ok(Some(CheckpointRecord::Oversized(stub)))
                }
                Err(e) => self.discard_corrupted(id, &key, &e.to_string()).await,
            };
        }

        let now = self.clock.now();
        let checkpoint = match validation::validate(&value, now) {
            Ok(checkpoint) => checkpoint,
            Err(e) => return self.discard_corrupted(id, &key, &e.to_string()).await,
        };

        if checkpoint.is_expired_at(now) {
            Counters::bump(&self.counters.expired);
            Counters::bump(&self.counters.misses);
            self.cache.delete(&key).await?;
            debug!(checkpoint_id = %id, "Cached checkpoint past expiry, deleted");
            return Ok(None);
        }

        Counters::bump(&self.counters.hits);
        Ok(Some(CheckpointRecord::Full(checkpoint)))
    }

    async fn discard_corrupted(&self, id: &str, key: &str, reason: &str) -> Result<Option<CheckpointRecord>> {
        Counters::bump(&self.counters.corrupted);
        Counters::bump(&self.counters.misses);
        warn!(
            checkpoint_id = %id,
            reason,
            deleted = self.delete_on_corruption,
            "Corrupted checkpoint entry in cache"
        );

        if self.delete_on_corruption {
            self.cache.delete(key).await?;
        }
        Ok(None)
    }

    /// Shallow-merge `partial` over the stored record and write it back
    ///
    /// `pipeline_data` in `partial` replaces the stored one wholesale. Stubs are
    /// never mutated; they come back unchanged.
    pub async fn update(&self, id: &str, partial: &Map<String, Value>) -> Result<CheckpointRecord> {
        let checkpoint = match self.get(id).await? {
            None => return Err(CheckpointError::NotFound(id.to_string())),
            Some(CheckpointRecord::Oversized(stub)) => {
                warn!(checkpoint_id = %id, "Refusing to update oversized checkpoint stub");
                return Ok(CheckpointRecord::Oversized(stub));
            }
            Some(CheckpointRecord::Full(checkpoint)) => checkpoint,
        };

        let mut merged: Map<String, Value> = serde_json::from_value(serde_json::to_value(&checkpoint)?)?;
        for (field, value) in partial {
            merged.insert(field.clone(), value.clone());
        }
        merged.insert(
            "updated_at".to_string(),
            Value::from(timestamp::format(&self.clock.now())),
        );

        self.set(id, &Value::Object(merged)).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let deleted = self.cache.delete(&self.key(id)).await?;
        if deleted {
            Counters::bump(&self.counters.deletes);
        }
        Ok(deleted)
    }

    /// Whether a key is physically present (no validation)
    pub async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.cache.exists(&self.key(id)).await?)
    }

    /// Fetch many records concurrently
    ///
    /// A failing read is logged and reported as `None` for that id only.
    pub async fn get_multiple(&self, ids: &[String]) -> HashMap<String, Option<CheckpointRecord>> {
        let reads = ids.iter().map(|id| async move { (id.clone(), self.get(id).await) });

        join_all(reads)
            .await
            .into_iter()
            .map(|(id, result)| match result {
                Ok(record) => (id, record),
                Err(e) => {
                    warn!(checkpoint_id = %id, error = %e, "Batch read failed for checkpoint");
                    (id, None)
                }
            })
            .collect()
    }

    /// Validate and store many records in one pipelined write
    ///
    /// Records that fail validation or encoding are reported in
    /// [`BatchWrite::failed`]; the rest are written together. A failure of the
    /// pipelined write itself is propagated.
    pub async fn set_multiple(&self, records: Vec<(String, Value)>) -> Result<BatchWrite> {
        let now = self.clock.now();
        let mut batch = BatchWrite::default();
        let mut entries = Vec::with_capacity(records.len());

        for (id, data) in records {
            let encoded = validation::validate(&data, now)
                .map_err(CheckpointError::from)
                .and_then(|checkpoint| self.encode(checkpoint));
            match encoded {
                Ok((record, bytes)) => {
                    entries.push((self.key(&id), bytes));
                    batch.written.push((id, record));
                }
                Err(e) => {
                    warn!(checkpoint_id = %id, error = %e, "Skipping invalid checkpoint in batch");
                    batch.failed.push((id, e));
                }
            }
        }

        if !entries.is_empty() {
            let count = entries.len() as u64;
            self.cache.set_many(entries, Some(self.fast_tier_ttl)).await?;
            self.counters.writes.fetch_add(count, Ordering::Relaxed);
        }

        debug!(
            written = batch.written.len(),
            failed = batch.failed.len(),
            "Checkpoint batch cached"
        );
        Ok(batch)
    }

    /// Delete every key under the namespace
    ///
    /// An operator action; nothing on the hot path calls it.
    pub async fn clear_all(&self) -> Result<usize> {
        let keys = self.cache.scan(&format!("{}:*", self.namespace)).await?;
        let deleted = self.cache.delete_many(&keys).await?;
        self.counters.deletes.fetch_add(deleted as u64, Ordering::Relaxed);

        info!(namespace = %self.namespace, deleted, "Cleared checkpoint cache");
        Ok(deleted)
    }

    /// Counter snapshot plus the live entry count
    pub async fn get_stats(&self) -> Result<CacheStats> {
        let entries = self.cache.scan(&format!("{}:*", self.namespace)).await?.len();
        let c = &self.counters;

        Ok(CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            oversized: c.oversized.load(Ordering::Relaxed),
            corrupted: c.corrupted.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_store::{CheckpointStatus, InMemoryKeyValueCache, JobType, ManualClock};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn setup(config: &CheckpointConfig) -> (CheckpointCacheService, InMemoryKeyValueCache, ManualClock) {
        let cache = InMemoryKeyValueCache::new();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let service = CheckpointCacheService::new(Arc::new(cache.clone()), config, Arc::new(clock.clone()));
        (service, cache, clock)
    }

    fn checkpoint(clock: &ManualClock) -> Checkpoint {
        Checkpoint::new(
            "job-42",
            "shop.example.com",
            JobType::ProductCatalog,
            Map::new(),
            clock.now(),
            Duration::days(7),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_carry_the_fast_tier_ttl() {
        let config = CheckpointConfig::default();
        let (service, cache, clock) = setup(&config);
        let cp = checkpoint(&clock);
        let id = cp.checkpoint_id.to_string();

        service.set_checkpoint(&cp).await.unwrap();

        let ttl = cache.ttl(&service.key(&id)).await.unwrap();
        assert_eq!(ttl, Some(config.fast_tier_ttl()));
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let (service, _, clock) = setup(&CheckpointConfig::default());
        let cp = checkpoint(&clock);
        let id = cp.checkpoint_id.to_string();

        let stored = service.set(&id, &serde_json::to_value(&cp).unwrap()).await.unwrap();
        let loaded = service.get(&id).await.unwrap().unwrap();

        assert_eq!(stored, CheckpointRecord::Full(cp.clone()));
        assert_eq!(loaded, CheckpointRecord::Full(cp));
    }

    #[tokio::test]
    async fn test_set_rejects_invalid_without_writing() {
        let (service, cache, clock) = setup(&CheckpointConfig::default());
        let mut data = serde_json::to_value(checkpoint(&clock)).unwrap();
        data["site_domain"] = json!("not a host!");
        data["pipeline_step"] = json!(9);

        let err = service.set("cp1", &data).await.unwrap_err();

        match err {
            CheckpointError::Validation(e) => {
                assert!(e.has_field("site_domain"));
                assert!(e.has_field("pipeline_step"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_payload_degrades_to_stub() {
        let mut config = CheckpointConfig::default();
        config.max_payload_size_bytes = 1024;
        let (service, _, clock) = setup(&config);

        let mut cp = checkpoint(&clock);
        cp.pipeline_data.urls_discovered = (0..100).map(|i| format!("/product/{i}")).collect();
        let id = cp.checkpoint_id.to_string();

        let record = service.set(&id, &serde_json::to_value(&cp).unwrap()).await.unwrap();
        assert!(record.is_oversized());
        assert!(record.pipeline_data().is_none());

        let loaded = service.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        let updated = service
            .update(&id, json!({"status": "failed"}).as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(updated, record);
        assert_eq!(service.get_stats().await.unwrap().oversized, 1);
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_deleted() {
        let (service, cache, _) = setup(&CheckpointConfig::default());
        cache
            .set("checkpoint:cp1", br#"{"checkpoint_id":"nope"}"#.to_vec(), None)
            .await
            .unwrap();

        assert_eq!(service.get("cp1").await.unwrap(), None);
        assert!(!service.exists("cp1").await.unwrap());

        cache.set("checkpoint:cp2", b"\xff\xfe".to_vec(), None).await.unwrap();
        assert_eq!(service.get("cp2").await.unwrap(), None);
        assert!(!service.exists("cp2").await.unwrap());

        assert_eq!(service.get_stats().await.unwrap().corrupted, 2);
    }

    #[tokio::test]
    async fn test_corrupted_entry_kept_when_policy_off() {
        let mut config = CheckpointConfig::default();
        config.delete_on_corruption = false;
        let (service, cache, _) = setup(&config);
        cache.set("checkpoint:cp1", b"garbage".to_vec(), None).await.unwrap();

        assert_eq!(service.get("cp1").await.unwrap(), None);
        assert!(service.exists("cp1").await.unwrap());
    }

    #[tokio::test]
    async fn test_logically_expired_entry_is_deleted() {
        let (service, _, clock) = setup(&CheckpointConfig::default());
        let mut cp = checkpoint(&clock);
        cp.expires_at = Some(clock.now() + Duration::hours(1));
        service.set_checkpoint(&cp).await.unwrap();
        let id = cp.checkpoint_id.to_string();

        clock.advance(Duration::hours(2));

        assert_eq!(service.get(&id).await.unwrap(), None);
        assert!(!service.exists(&id).await.unwrap());
        assert_eq!(service.get_stats().await.unwrap().expired, 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_stamps() {
        let (service, _, clock) = setup(&CheckpointConfig::default());
        let cp = checkpoint(&clock);
        let id = cp.checkpoint_id.to_string();
        service.set_checkpoint(&cp).await.unwrap();

        clock.advance(Duration::minutes(5));
        let partial = json!({
            "pipeline_step": 2,
            "pipeline_data": {"urls_discovered": ["/a"]},
        });
        let updated = service.update(&id, partial.as_object().unwrap()).await.unwrap();

        let updated = updated.into_checkpoint().unwrap();
        assert_eq!(updated.pipeline_step, 2);
        assert_eq!(updated.pipeline_data.urls_discovered, vec!["/a".to_string()]);
        assert_eq!(updated.status, CheckpointStatus::Active);
        assert_eq!(updated.updated_at, clock.now());
        assert_eq!(updated.created_at, cp.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (service, _, _) = setup(&CheckpointConfig::default());
        let err = service.update("missing", &Map::new()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_batch_helpers_isolate_failures() {
        let (service, _, clock) = setup(&CheckpointConfig::default());
        let good = checkpoint(&clock);
        let good_id = good.checkpoint_id.to_string();

        let batch = service
            .set_multiple(vec![
                (good_id.clone(), serde_json::to_value(&good).unwrap()),
                ("bad".to_string(), json!({"job_id": ""})),
            ])
            .await
            .unwrap();
        assert_eq!(batch.written.len(), 1);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, "bad");

        let read = service
            .get_multiple(&[good_id.clone(), "absent".to_string()])
            .await;
        assert!(read[&good_id].is_some());
        assert!(read["absent"].is_none());
    }

    #[tokio::test]
    async fn test_clear_all_and_stats() {
        let (service, cache, clock) = setup(&CheckpointConfig::default());
        for _ in 0..3 {
            service.set_checkpoint(&checkpoint(&clock)).await.unwrap();
        }
        cache.set("session:other", b"x".to_vec(), None).await.unwrap();
        service.get("absent").await.unwrap();

        let stats = service.get_stats().await.unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.writes, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio(), 0.0);

        assert_eq!(service.clear_all().await.unwrap(), 3);
        assert_eq!(cache.len().await, 1);
    }
}
