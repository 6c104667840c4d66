//! Two-tier checkpoint orchestration
//!
//! [`CheckpointManager`] is the only entry point pipeline workers use. It owns
//! the selective write-through policy, job-to-checkpoint resolution and the
//! resume decision.
//!
//! # Write Policy
//!
//! | Operation                         | Fast tier | Durable store          |
//! |-----------------------------------|-----------|------------------------|
//! | `create_checkpoint`               | write     | insert                 |
//! | `save_progress(step_complete)`    | write     | upsert by checkpoint id |
//! | `save_progress(step 4)`           | write     | upsert by checkpoint id |
//! | `save_progress` (mid-step)        | write     | -                      |
//! | `mark_failed`                     | write     | upsert by checkpoint id |
//! | `clear_expired`                   | -         | delete `expires_at < now` |
//!
//! Mid-step progress may be lost on a crash; step-boundary progress may not.
//!
//! # Failure Policy
//!
//! When the fast-tier write succeeds and the durable write then fails, the
//! fast-tier write stands and [`CheckpointError::DurableSync`] is returned.
//! Nothing is retried or rolled back: the next step-boundary upsert carries the
//! full record and brings the durable copy up to date.
//!
//! # Feature Flag
//!
//! With `checkpoints_enabled = false` every operation returns `Ok(None)` (or
//! `Ok(())`) without touching either tier, so callers need no conditional logic.
//!
//! # Concurrency
//!
//! Updates are read-modify-write without version checks. One worker per job is
//! assumed; two writers to one checkpoint may drop each other's fields but never
//! produce a half-written record, since every write is a single merged value.

use crate::cache_service::{CacheStats, CheckpointCacheService};
use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, Result};
use crate::resume::ResumePoint;
use checkpoint_store::{
    checkpoint::timestamp, validation, Checkpoint, CheckpointRecord, CheckpointStatus,
    Clock, Document, DocumentStore, ErrorDetails, Filter, FindOptions,
    IndexSpec, JobType, KeyValueCache, SortOrder, ValidationError, MAX_PIPELINE_STEP,
    MIN_PIPELINE_STEP,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `(job_id, created_at desc)`: job resolution
pub const JOB_CREATED_INDEX: &str = "job_created";

/// `(expires_at)`: TTL sweep
pub const EXPIRES_INDEX: &str = "expires";

/// `(site_domain, status)`: operational listings
pub const DOMAIN_STATUS_INDEX: &str = "domain_status";

/// Secondary indexes the durable store needs
pub fn durable_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new(JOB_CREATED_INDEX)
            .field("job_id", SortOrder::Asc)
            .field("created_at", SortOrder::Desc),
        IndexSpec::new(EXPIRES_INDEX).field("expires_at", SortOrder::Asc),
        IndexSpec::new(DOMAIN_STATUS_INDEX)
            .field("site_domain", SortOrder::Asc)
            .field("status", SortOrder::Asc),
    ]
}

fn by_checkpoint_id(id: &str) -> Filter {
    Filter::eq("checkpoint_id", id)
}

fn to_map<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

#[derive(Debug, Default)]
struct ManagerCounters {
    created: AtomicU64,
    progress_saves: AtomicU64,
    durable_syncs: AtomicU64,
    durable_sync_failures: AtomicU64,
    cache_fills: AtomicU64,
    resume_lookups: AtomicU64,
    failures_marked: AtomicU64,
    expired_removed: AtomicU64,
}

/// Snapshot of manager activity
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub created: u64,
    pub progress_saves: u64,
    pub durable_syncs: u64,
    pub durable_sync_failures: u64,
    /// Fast-tier repopulations after a durable fallback
    pub cache_fills: u64,
    pub resume_lookups: u64,
    pub failures_marked: u64,
    pub expired_removed: u64,
    pub cache: CacheStats,
}

/// Checkpoint manager
///
/// Cheap to share: wrap it in an `Arc` and hand it to every worker.
pub struct CheckpointManager {
    config: CheckpointConfig,
    cache: Arc<CheckpointCacheService>,
    durable: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    counters: ManagerCounters,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl CheckpointManager {
    /// Create a manager over a shared cache service
    ///
    /// The manager uses the cache service's clock so both layers agree on "now".
    pub fn new(
        config: CheckpointConfig,
        cache: Arc<CheckpointCacheService>,
        durable: Arc<dyn DocumentStore>,
    ) -> Self {
        let clock = cache.clock();
        Self {
            config,
            cache,
            durable,
            clock,
            counters: ManagerCounters::default(),
        }
    }

    /// Create a manager and its cache service from raw backends
    pub fn with_backends(
        config: CheckpointConfig,
        fast: Arc<dyn KeyValueCache>,
        durable: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(CheckpointCacheService::new(fast, &config, clock));
        Self::new(config, cache, durable)
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CheckpointCacheService> {
        &self.cache
    }

    pub fn is_enabled(&self) -> bool {
        self.config.checkpoints_enabled
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Create the step-1 checkpoint for a new job
    ///
    /// The job type is read from `metadata["job_type"]` (default
    /// `product_catalog`).
    pub async fn create_checkpoint(
        &self,
        job_id: &str,
        site_domain: &str,
        metadata: Map<String, Value>,
    ) -> Result<Option<Checkpoint>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let now = self.clock.now();
        let job_type = JobType::from_metadata(&metadata);
        let skeleton = Checkpoint::new(
            job_id,
            site_domain,
            job_type,
            metadata,
            now,
            self.config.durable_ttl(),
        );
        let checkpoint = validation::validate(&serde_json::to_value(&skeleton)?, now)?;

        self.cache.set_checkpoint(&checkpoint).await?;

        if self.config.sync_to_durable_store {
            let document = self.durable_document(&checkpoint, now)?;
            if let Err(source) = self.durable.insert(document).await {
                return Err(self.durable_sync_failed(checkpoint.checkpoint_id, source));
            }
            Self::bump(&self.counters.durable_syncs);
        }

        Self::bump(&self.counters.created);
        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            job_id,
            site_domain,
            job_type = %job_type,
            "Checkpoint created"
        );
        Ok(Some(checkpoint))
    }

    /// Record pipeline progress
    ///
    /// `partial_data` is shallow-merged into `pipeline_data`. The record becomes
    /// `completed` when step 4 completes. The durable store is written only when
    /// `step_complete` is set or `step` is 4.
    ///
    /// If the fast tier only holds an oversized stub, the durable copy is used
    /// as the merge base; without durable sync the stub is returned unchanged.
    pub async fn save_progress(
        &self,
        checkpoint_id: Uuid,
        step: u8,
        partial_data: Map<String, Value>,
        step_complete: bool,
    ) -> Result<Option<CheckpointRecord>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        if !(MIN_PIPELINE_STEP..=MAX_PIPELINE_STEP).contains(&step) {
            return Err(ValidationError::single(
                "pipeline_step",
                format!(
                    "must be between {} and {}, got {}",
                    MIN_PIPELINE_STEP, MAX_PIPELINE_STEP, step
                ),
            )
            .into());
        }

        let id = checkpoint_id.to_string();
        let current = match self.cache.get(&id).await? {
            None => return Err(CheckpointError::NotFound(id)),
            Some(CheckpointRecord::Full(checkpoint)) => checkpoint,
            Some(CheckpointRecord::Oversized(stub)) => {
                if stub.status.is_terminal() {
                    return Err(CheckpointError::Terminal {
                        checkpoint_id,
                        status: stub.status,
                    });
                }
                match self.durable_copy(&id).await? {
                    Some(checkpoint) => checkpoint,
                    None => {
                        warn!(checkpoint_id = %id, "No merge base for oversized checkpoint, progress not recorded");
                        return Ok(Some(CheckpointRecord::Oversized(stub)));
                    }
                }
            }
        };

        if current.status.is_terminal() {
            return Err(CheckpointError::Terminal {
                checkpoint_id,
                status: current.status,
            });
        }

        let now = self.clock.now();
        let status = if step == MAX_PIPELINE_STEP && step_complete {
            CheckpointStatus::Completed
        } else {
            current.status
        };

        let mut pipeline_data = to_map(&current.pipeline_data)?;
        pipeline_data.extend(partial_data);

        let mut merged = to_map(&current)?;
        merged.insert("pipeline_data".into(), Value::Object(pipeline_data));
        merged.insert("pipeline_step".into(), Value::from(step));
        merged.insert("status".into(), Value::from(status.as_str()));
        merged.insert("updated_at".into(), Value::from(timestamp::format(&now)));
        let checkpoint = validation::validate(&Value::Object(merged), now)?;

        let record = self.cache.set_checkpoint(&checkpoint).await?;
        Self::bump(&self.counters.progress_saves);
        debug!(checkpoint_id = %id, step, step_complete, "Progress saved");

        if self.config.sync_to_durable_store && (step_complete || step == MAX_PIPELINE_STEP) {
            self.sync_durable(&checkpoint, now).await?;
        }

        if status == CheckpointStatus::Completed {
            info!(checkpoint_id = %id, job_id = %checkpoint.job_id, "Checkpoint completed");
        }
        Ok(Some(record))
    }

    /// Latest checkpoint for a job
    ///
    /// Needs the durable store's job index; with durable sync disabled there is
    /// no way to resolve a job and the result is `None`.
    pub async fn load_checkpoint(&self, job_id: &str) -> Result<Option<CheckpointRecord>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.resolve_job(job_id).await
    }

    /// Where an interrupted job should continue
    pub async fn get_resume_point(&self, job_id: &str) -> Result<Option<ResumePoint>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let point = match self.resolve_job(job_id).await? {
            Some(record) => ResumePoint::from_record(record),
            None => ResumePoint::fresh(),
        };

        Self::bump(&self.counters.resume_lookups);
        info!(
            job_id,
            can_resume = point.can_resume,
            start_step = point.start_step,
            "Resume point computed"
        );
        Ok(Some(point))
    }

    /// Mark a checkpoint failed, keeping its progress data
    ///
    /// Completed checkpoints cannot fail. A failed checkpoint can be marked
    /// again, which replaces its error details. The failed record is rebuilt in
    /// full and written to both tiers, so a record the error details push over
    /// the payload budget still reaches the durable store.
    ///
    /// An oversized stub with no durable copy behind it cannot be marked and
    /// yields [`CheckpointError::NoMergeBase`].
    pub async fn mark_failed(
        &self,
        checkpoint_id: Uuid,
        message: &str,
        stack: Option<String>,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let id = checkpoint_id.to_string();
        let current = match self.cache.get(&id).await? {
            Some(CheckpointRecord::Full(checkpoint)) => checkpoint,
            Some(CheckpointRecord::Oversized(stub)) => {
                if stub.status == CheckpointStatus::Completed {
                    return Err(CheckpointError::Terminal {
                        checkpoint_id,
                        status: stub.status,
                    });
                }
                match self.durable_copy(&id).await? {
                    Some(checkpoint) => checkpoint,
                    None => return Err(CheckpointError::NoMergeBase(checkpoint_id)),
                }
            }
            None => match self.durable_copy(&id).await? {
                Some(checkpoint) => checkpoint,
                None => return Err(CheckpointError::NotFound(id)),
            },
        };

        if current.status == CheckpointStatus::Completed {
            return Err(CheckpointError::Terminal {
                checkpoint_id,
                status: current.status,
            });
        }

        let now = self.clock.now();
        let details = ErrorDetails::new(message, stack, now);

        let mut merged = to_map(&current)?;
        merged.insert("status".into(), Value::from(CheckpointStatus::Failed.as_str()));
        merged.insert("error_details".into(), serde_json::to_value(&details)?);
        merged.insert("updated_at".into(), Value::from(timestamp::format(&now)));
        let checkpoint = validation::validate(&Value::Object(merged), now)?;

        let record = self.cache.set_checkpoint(&checkpoint).await?;
        if record.is_oversized() {
            debug!(checkpoint_id = %id, "Failed checkpoint cached as a stub");
        }

        if self.config.sync_to_durable_store {
            self.sync_durable(&checkpoint, now).await?;
        }

        Self::bump(&self.counters.failures_marked);
        info!(checkpoint_id = %id, error = message, "Checkpoint marked failed");
        Ok(())
    }

    /// Delete durable documents whose `expires_at` has passed
    ///
    /// The fast tier expires on its own TTL and is not touched.
    pub async fn clear_expired(&self) -> Result<Option<u64>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        if !self.config.sync_to_durable_store {
            debug!("Durable sync disabled, nothing to sweep");
            return Ok(Some(0));
        }

        let cutoff = timestamp::format(&self.clock.now());
        let removed = self.durable.delete_many(&Filter::lt("expires_at", cutoff)).await?;

        self.counters.expired_removed.fetch_add(removed, Ordering::Relaxed);
        info!(removed, "Expired checkpoints cleared");
        Ok(Some(removed))
    }

    /// Create the durable store's secondary indexes
    pub async fn ensure_indexes(&self) -> Result<()> {
        if !self.is_enabled() || !self.config.sync_to_durable_store {
            return Ok(());
        }

        for index in durable_indexes() {
            self.durable.ensure_index(&index).await?;
        }
        info!("Durable checkpoint indexes ensured");
        Ok(())
    }

    /// Durable checkpoints by domain and/or status, newest first
    ///
    /// Documents that no longer validate are skipped.
    pub async fn list_checkpoints(
        &self,
        site_domain: Option<&str>,
        status: Option<CheckpointStatus>,
        limit: Option<usize>,
    ) -> Result<Option<Vec<Checkpoint>>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        if !self.config.sync_to_durable_store {
            warn!("Listing checkpoints needs the durable store; sync is disabled");
            return Ok(Some(Vec::new()));
        }

        let mut filters = Vec::new();
        if let Some(domain) = site_domain {
            filters.push(Filter::eq("site_domain", domain));
        }
        if let Some(status) = status {
            filters.push(Filter::eq("status", status.as_str()));
        }

        let mut options = FindOptions::new().sort_by("created_at", SortOrder::Desc);
        if let Some(limit) = limit {
            options = options.limit(limit);
        }

        let now = self.clock.now();
        let documents = self.durable.find(&Filter::and(filters), &options).await?;
        let checkpoints = documents
            .into_iter()
            .filter_map(|document| {
                match validation::validate(&validation::prepare_for_fast_tier(document), now) {
                    Ok(checkpoint) => Some(checkpoint),
                    Err(e) => {
                        warn!(error = %e, "Skipping invalid durable checkpoint");
                        None
                    }
                }
            })
            .collect();
        Ok(Some(checkpoints))
    }

    /// Manager and cache service counters
    pub async fn stats(&self) -> Result<Option<ManagerStats>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let c = &self.counters;
        Ok(Some(ManagerStats {
            created: c.created.load(Ordering::Relaxed),
            progress_saves: c.progress_saves.load(Ordering::Relaxed),
            durable_syncs: c.durable_syncs.load(Ordering::Relaxed),
            durable_sync_failures: c.durable_sync_failures.load(Ordering::Relaxed),
            cache_fills: c.cache_fills.load(Ordering::Relaxed),
            resume_lookups: c.resume_lookups.load(Ordering::Relaxed),
            failures_marked: c.failures_marked.load(Ordering::Relaxed),
            expired_removed: c.expired_removed.load(Ordering::Relaxed),
            cache: self.cache.get_stats().await?,
        }))
    }

    /// Job -> latest checkpoint, preferring the fast-tier copy
    async fn resolve_job(&self, job_id: &str) -> Result<Option<CheckpointRecord>> {
        if !self.config.sync_to_durable_store {
            warn!(job_id, "Job lookup needs the durable store; sync is disabled");
            return Ok(None);
        }

        let latest = FindOptions::new().sort_by("created_at", SortOrder::Desc);
        let Some(document) = self.durable.find_one(&Filter::eq("job_id", job_id), &latest).await? else {
            debug!(job_id, "No checkpoint for job");
            return Ok(None);
        };

        let now = self.clock.now();
        let checkpoint = validation::validate(&validation::prepare_for_fast_tier(document), now)?;
        let id = checkpoint.checkpoint_id.to_string();

        if let Some(record) = self.cache.get(&id).await? {
            return Ok(Some(record));
        }

        if checkpoint.is_expired_at(now) {
            debug!(job_id, checkpoint_id = %id, "Durable checkpoint past expiry");
            return Ok(None);
        }

        match self.cache.set_checkpoint(&checkpoint).await {
            Ok(_) => Self::bump(&self.counters.cache_fills),
            Err(e) => warn!(checkpoint_id = %id, error = %e, "Cache fill from durable store failed"),
        }
        Ok(Some(CheckpointRecord::Full(checkpoint)))
    }

    /// Full durable record for a checkpoint id, if durable sync is on
    async fn durable_copy(&self, id: &str) -> Result<Option<Checkpoint>> {
        if !self.config.sync_to_durable_store {
            return Ok(None);
        }

        let Some(document) = self.durable.find_one(&by_checkpoint_id(id), &FindOptions::new()).await? else {
            return Ok(None);
        };
        let checkpoint = validation::validate(&validation::prepare_for_fast_tier(document), self.clock.now())?;
        Ok(Some(checkpoint))
    }

    fn durable_document(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> Result<Document> {
        let data = serde_json::to_value(checkpoint)?;
        Ok(validation::prepare_for_durable_store(data, now, self.config.durable_ttl())?)
    }

    /// Idempotent upsert of the full record, keyed by checkpoint id
    async fn sync_durable(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> Result<()> {
        let id = checkpoint.checkpoint_id.to_string();
        let document = self.durable_document(checkpoint, now)?;

        match self.durable.replace_one(&by_checkpoint_id(&id), document, true).await {
            Ok(outcome) => {
                Self::bump(&self.counters.durable_syncs);
                debug!(checkpoint_id = %id, ?outcome, "Checkpoint synced to durable store");
                Ok(())
            }
            Err(source) => Err(self.durable_sync_failed(checkpoint.checkpoint_id, source)),
        }
    }

    fn durable_sync_failed(&self, checkpoint_id: Uuid, source: checkpoint_store::StoreError) -> CheckpointError {
        Self::bump(&self.counters.durable_sync_failures);
        warn!(
            checkpoint_id = %checkpoint_id,
            error = %source,
            "Durable sync failed; fast tier is ahead until the next step boundary"
        );
        CheckpointError::DurableSync {
            checkpoint_id,
            source,
        }
    }
}
