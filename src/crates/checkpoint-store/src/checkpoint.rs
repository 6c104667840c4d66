//! Core checkpoint data structures for resumable scrape jobs
//!
//! A **[`Checkpoint`]** is a versioned snapshot of one job's pipeline progress. It is
//! created at step 1 with status `active`, advanced in place as pipeline steps finish,
//! and ends either `completed` (step 4 finished) or `failed` (terminal, data retained).
//!
//! # Core Types
//!
//! - [`Checkpoint`] - Full progress snapshot, the shape stored in both tiers
//! - [`PipelineData`] - Open progress envelope; job types stash their own fields in `extra`
//! - [`CheckpointStub`] - Degraded fast-tier record kept when a payload exceeds the size budget
//! - [`CheckpointRecord`] - What a fast-tier read or write hands back: full record or stub
//! - [`JobType`], [`CheckpointStatus`] - Closed enumerations validated on every tier crossing
//!
//! # Lifecycle
//!
//! ```text
//!   create ──► active(step 1) ──save(step<4, complete)──► active(step+1)
//!                   │                                          │
//!                   │ mark_failed                              │ save(step 4, complete)
//!                   ▼                                          ▼
//!                failed (terminal)                        completed (terminal)
//! ```
//!
//! No explicit `expired` row is ever written: expiry is signalled by absence on read.
//!
//! # Timestamps
//!
//! Timestamps serialize as RFC 3339 with exactly three fractional digits and a `Z`
//! suffix (see [`timestamp`]). The fixed width keeps lexicographic order equal to
//! chronological order, which the durable store relies on for its
//! `(job_id, created_at desc)` and `(expires_at)` indexes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// First pipeline step (discovery)
pub const MIN_PIPELINE_STEP: u8 = 1;

/// Last pipeline step (extraction)
pub const MAX_PIPELINE_STEP: u8 = 4;

/// Default durable-tier lifetime of a checkpoint
pub const DEFAULT_DURABLE_TTL_DAYS: i64 = 7;

/// Store-internal identity field carried by durable documents only
pub const STORE_ID_FIELD: &str = "_id";

/// Marker field identifying an oversized stub in the fast tier
pub const OVERSIZED_FIELD: &str = "oversized";

/// Serde helpers for fixed-width millisecond RFC 3339 timestamps
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Format a timestamp the way every tier stores it
    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parse any RFC 3339 timestamp, normalised to UTC millisecond precision
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw).map(|ts| truncate(ts.with_timezone(&Utc)))
    }

    /// Drop sub-millisecond precision so values survive a serialize round-trip unchanged
    pub fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.trunc_subsecs(3)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Same encoding for optional timestamps
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_str(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            raw.map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Kind of scrape job a checkpoint tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ProductCatalog,
    ProductDetail,
    CategoryDiscovery,
    SearchResults,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::ProductCatalog,
        JobType::ProductDetail,
        JobType::CategoryDiscovery,
        JobType::SearchResults,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ProductCatalog => "product_catalog",
            JobType::ProductDetail => "product_detail",
            JobType::CategoryDiscovery => "category_discovery",
            JobType::SearchResults => "search_results",
        }
    }

    /// Read `job_type` out of free-form job metadata, falling back to a product catalog
    pub fn from_metadata(metadata: &Map<String, Value>) -> Self {
        metadata
            .get("job_type")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(JobType::ProductCatalog)
    }
}

impl Default for JobType {
    fn default() -> Self {
        JobType::ProductCatalog
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|job_type| job_type.as_str() == s)
            .ok_or_else(|| format!("unknown job type '{}'", s))
    }
}

/// Lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    Completed,
    Failed,
    Expired,
}

impl CheckpointStatus {
    pub const ALL: [CheckpointStatus; 4] = [
        CheckpointStatus::Active,
        CheckpointStatus::Completed,
        CheckpointStatus::Failed,
        CheckpointStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Active => "active",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::Expired => "expired",
        }
    }

    /// Completed and failed checkpoints accept no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckpointStatus::Completed | CheckpointStatus::Failed)
    }
}

impl Default for CheckpointStatus {
    fn default() -> Self {
        CheckpointStatus::Active
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckpointStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown checkpoint status '{}'", s))
    }
}

fn default_current_page() -> u32 {
    1
}

/// Open progress envelope for one job
///
/// The common progress fields are typed; anything else a job type needs
/// (`main_categories`, `subcategories`, ...) lives in `extra` and round-trips untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineData {
    #[serde(default)]
    pub urls_discovered: Vec<String>,

    #[serde(default)]
    pub urls_processed: Vec<String>,

    #[serde(default = "default_current_page")]
    pub current_page: u32,

    #[serde(default)]
    pub pagination_state: Map<String, Value>,

    #[serde(default)]
    pub extraction_results: Vec<Value>,

    /// Job-type-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PipelineData {
    fn default() -> Self {
        Self {
            urls_discovered: Vec::new(),
            urls_processed: Vec::new(),
            current_page: default_current_page(),
            pagination_state: Map::new(),
            extraction_results: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl PipelineData {
    /// Whether any progress array holds evidence of work done
    pub fn has_progress(&self) -> bool {
        !self.urls_discovered.is_empty()
            || !self.urls_processed.is_empty()
            || !self.extraction_results.is_empty()
    }

    /// Look up a job-type-specific field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

/// Failure details attached to a failed checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>, stack: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            stack,
            timestamp: timestamp::truncate(at),
        }
    }
}

/// Snapshot of one job's pipeline progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Immutable identity, never reassigned
    pub checkpoint_id: Uuid,

    /// Groups checkpoints belonging to one job
    pub job_id: String,

    pub site_domain: String,

    pub job_type: JobType,

    /// Current pipeline step, 1 through 4
    pub pipeline_step: u8,

    #[serde(default)]
    pub pipeline_data: PipelineData,

    #[serde(default)]
    pub status: CheckpointStatus,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,

    /// Durable-tier TTL marker
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Build the step-1 skeleton for a new job
    pub fn new(
        job_id: impl Into<String>,
        site_domain: impl Into<String>,
        job_type: JobType,
        metadata: Map<String, Value>,
        now: DateTime<Utc>,
        durable_ttl: Duration,
    ) -> Self {
        let now = timestamp::truncate(now);
        Self {
            checkpoint_id: Uuid::new_v4(),
            job_id: job_id.into(),
            site_domain: site_domain.into(),
            job_type,
            pipeline_step: MIN_PIPELINE_STEP,
            pipeline_data: PipelineData::default(),
            status: CheckpointStatus::Active,
            metadata,
            error_details: None,
            created_at: now,
            updated_at: now,
            expires_at: Some(now + durable_ttl),
        }
    }

    /// Logical expiry check against the durable TTL marker
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Time elapsed since creation
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Identity and status fields only, as kept for oversized payloads
    pub fn to_stub(&self) -> CheckpointStub {
        CheckpointStub {
            checkpoint_id: self.checkpoint_id,
            site_domain: self.site_domain.clone(),
            status: self.status,
            pipeline_step: self.pipeline_step,
            created_at: self.created_at,
            updated_at: self.updated_at,
            oversized: true,
        }
    }
}

/// Degraded fast-tier record retaining identity and status only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStub {
    pub checkpoint_id: Uuid,
    pub site_domain: String,
    pub status: CheckpointStatus,
    pub pipeline_step: u8,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,

    pub oversized: bool,
}

/// A fast-tier record: either the full checkpoint or its oversized stub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckpointRecord {
    Oversized(CheckpointStub),
    Full(Checkpoint),
}

impl CheckpointRecord {
    pub fn checkpoint_id(&self) -> Uuid {
        match self {
            CheckpointRecord::Full(checkpoint) => checkpoint.checkpoint_id,
            CheckpointRecord::Oversized(stub) => stub.checkpoint_id,
        }
    }

    pub fn status(&self) -> CheckpointStatus {
        match self {
            CheckpointRecord::Full(checkpoint) => checkpoint.status,
            CheckpointRecord::Oversized(stub) => stub.status,
        }
    }

    pub fn pipeline_step(&self) -> u8 {
        match self {
            CheckpointRecord::Full(checkpoint) => checkpoint.pipeline_step,
            CheckpointRecord::Oversized(stub) => stub.pipeline_step,
        }
    }

    pub fn site_domain(&self) -> &str {
        match self {
            CheckpointRecord::Full(checkpoint) => &checkpoint.site_domain,
            CheckpointRecord::Oversized(stub) => &stub.site_domain,
        }
    }

    pub fn is_oversized(&self) -> bool {
        matches!(self, CheckpointRecord::Oversized(_))
    }

    /// The full checkpoint, when detail was not lost to the size budget
    pub fn as_checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            CheckpointRecord::Full(checkpoint) => Some(checkpoint),
            CheckpointRecord::Oversized(_) => None,
        }
    }

    pub fn into_checkpoint(self) -> Option<Checkpoint> {
        match self {
            CheckpointRecord::Full(checkpoint) => Some(checkpoint),
            CheckpointRecord::Oversized(_) => None,
        }
    }

    /// Progress data, absent for stubs
    pub fn pipeline_data(&self) -> Option<&PipelineData> {
        self.as_checkpoint().map(|checkpoint| &checkpoint.pipeline_data)
    }
}

impl From<Checkpoint> for CheckpointRecord {
    fn from(checkpoint: Checkpoint) -> Self {
        CheckpointRecord::Full(checkpoint)
    }
}
