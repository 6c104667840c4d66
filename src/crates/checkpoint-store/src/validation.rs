//! Checkpoint schema validation and tier preparation
//!
//! Every record that crosses into or out of a storage tier passes through
//! [`validate`]. It reports **every** violation it finds rather than stopping at the
//! first, applies defaults for absent fields, and only then builds the typed
//! [`Checkpoint`].
//!
//! [`prepare_for_durable_store`] and [`prepare_for_fast_tier`] adjust a record for the
//! tier it is about to enter; [`is_expired`] and [`get_age`] are pure predicates.

use crate::checkpoint::{
    timestamp, Checkpoint, CheckpointStatus, JobType, MAX_PIPELINE_STEP, MIN_PIPELINE_STEP,
    STORE_ID_FIELD,
};
use crate::traits::Document;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static UUID_V4_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-4[0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$")
        .unwrap()
});

static HOSTNAME_LABEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").unwrap());

const MAX_HOSTNAME_LEN: usize = 253;

/// One schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field, `$` for the record itself
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Schema violation listing every failing field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Checkpoint validation failed: {}", join_errors(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(field, message)],
        }
    }

    /// Whether a given field is among the violations
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

/// Whether `raw` is a canonical hyphenated UUIDv4
pub fn is_uuid_v4(raw: &str) -> bool {
    UUID_V4_REGEX.is_match(raw)
}

/// Whether `raw` is a syntactically valid hostname
pub fn is_valid_hostname(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_HOSTNAME_LEN
        && raw.split('.').all(|label| HOSTNAME_LABEL_REGEX.is_match(label))
}

/// Validate raw checkpoint data and build the typed record
///
/// Absent fields default to `status=active`, `pipeline_step=1`, an empty
/// `pipeline_data` skeleton and `created_at=updated_at=now`. Integral floats
/// (`2.0`) are accepted where integers are required.
pub fn validate(data: &Value, now: DateTime<Utc>) -> Result<Checkpoint, ValidationError> {
    let Some(input) = data.as_object() else {
        return Err(ValidationError::single("$", "expected an object"));
    };

    let now = timestamp::truncate(now);
    let mut errors = Vec::new();
    let mut record = input.clone();
    record.remove(STORE_ID_FIELD);

    match input.get("checkpoint_id") {
        Some(Value::String(id)) if is_uuid_v4(id) => {}
        Some(_) => errors.push(FieldError::new("checkpoint_id", "must be a UUIDv4 string")),
        None => errors.push(FieldError::new("checkpoint_id", "is required")),
    }

    match input.get("job_id") {
        Some(Value::String(job_id)) if !job_id.trim().is_empty() => {}
        Some(_) => errors.push(FieldError::new("job_id", "must be a non-empty string")),
        None => errors.push(FieldError::new("job_id", "is required")),
    }

    match input.get("site_domain") {
        Some(Value::String(domain)) if is_valid_hostname(domain) => {}
        Some(_) => errors.push(FieldError::new("site_domain", "must be a valid hostname")),
        None => errors.push(FieldError::new("site_domain", "is required")),
    }

    match input.get("job_type") {
        Some(Value::String(raw)) if raw.parse::<JobType>().is_ok() => {}
        Some(_) => errors.push(FieldError::new(
            "job_type",
            "must be one of product_catalog, product_detail, category_discovery, search_results",
        )),
        None => errors.push(FieldError::new("job_type", "is required")),
    }

    let status = match input.get("status") {
        None | Some(Value::Null) => {
            record.insert("status".into(), Value::from(CheckpointStatus::Active.as_str()));
            Some(CheckpointStatus::Active)
        }
        Some(Value::String(raw)) => match raw.parse::<CheckpointStatus>() {
            Ok(status) => Some(status),
            Err(_) => {
                errors.push(status_error());
                None
            }
        },
        Some(_) => {
            errors.push(status_error());
            None
        }
    };

    let step = match input.get("pipeline_step") {
        None | Some(Value::Null) => Some(i64::from(MIN_PIPELINE_STEP)),
        Some(value) => match as_integer(value) {
            Some(step) if (i64::from(MIN_PIPELINE_STEP)..=i64::from(MAX_PIPELINE_STEP)).contains(&step) => {
                Some(step)
            }
            _ => {
                errors.push(FieldError::new(
                    "pipeline_step",
                    format!("must be an integer between {} and {}", MIN_PIPELINE_STEP, MAX_PIPELINE_STEP),
                ));
                None
            }
        },
    };
    if let Some(step) = step {
        record.insert("pipeline_step".into(), Value::from(step));
    }

    match input.get("pipeline_data") {
        None | Some(Value::Null) => {
            record.insert("pipeline_data".into(), Value::Object(Map::new()));
        }
        Some(Value::Object(pipeline_data)) => {
            let normalized = validate_pipeline_data(pipeline_data, &mut errors);
            record.insert("pipeline_data".into(), Value::Object(normalized));
        }
        Some(_) => errors.push(FieldError::new("pipeline_data", "must be an object")),
    }

    match input.get("metadata") {
        None | Some(Value::Null) => {
            record.insert("metadata".into(), Value::Object(Map::new()));
        }
        Some(Value::Object(_)) => {}
        Some(_) => errors.push(FieldError::new("metadata", "must be an object")),
    }

    for field in ["created_at", "updated_at"] {
        match input.get(field) {
            None | Some(Value::Null) => {
                record.insert(field.into(), Value::from(timestamp::format(&now)));
            }
            Some(value) => check_timestamp(field, value, &mut errors),
        }
    }

    match input.get("expires_at") {
        None | Some(Value::Null) => {
            record.remove("expires_at");
        }
        Some(value) => check_timestamp("expires_at", value, &mut errors),
    }

    match input.get("error_details") {
        None | Some(Value::Null) => {
            record.remove("error_details");
        }
        Some(Value::Object(details)) => {
            if !matches!(details.get("message"), Some(Value::String(_))) {
                errors.push(FieldError::new("error_details.message", "must be a string"));
            }
            match details.get("timestamp") {
                Some(value) => check_timestamp("error_details.timestamp", value, &mut errors),
                None => errors.push(FieldError::new("error_details.timestamp", "is required")),
            }
            if status.is_some_and(|status| status != CheckpointStatus::Failed) {
                errors.push(FieldError::new(
                    "error_details",
                    "may only be present on failed checkpoints",
                ));
            }
        }
        Some(_) => errors.push(FieldError::new("error_details", "must be an object")),
    }

    if status == Some(CheckpointStatus::Completed)
        && step.is_some_and(|step| step != i64::from(MAX_PIPELINE_STEP))
    {
        errors.push(FieldError::new(
            "status",
            format!("completed is only reachable from step {}", MAX_PIPELINE_STEP),
        ));
    }

    if !errors.is_empty() {
        return Err(ValidationError { errors });
    }

    serde_json::from_value(Value::Object(record))
        .map_err(|e| ValidationError::single("$", e.to_string()))
}

fn status_error() -> FieldError {
    FieldError::new("status", "must be one of active, completed, failed, expired")
}

fn validate_pipeline_data(input: &Map<String, Value>, errors: &mut Vec<FieldError>) -> Map<String, Value> {
    let mut normalized = input.clone();

    match input.get("current_page") {
        None | Some(Value::Null) => {
            normalized.insert("current_page".into(), Value::from(1));
        }
        Some(value) => match as_integer(value) {
            Some(page) if page >= 1 && page <= i64::from(u32::MAX) => {
                normalized.insert("current_page".into(), Value::from(page));
            }
            _ => errors.push(FieldError::new(
                "pipeline_data.current_page",
                "must be an integer >= 1",
            )),
        },
    }

    for field in ["urls_discovered", "urls_processed"] {
        match input.get(field) {
            None | Some(Value::Null) => {
                normalized.remove(field);
            }
            Some(Value::Array(urls)) if urls.iter().all(Value::is_string) => {}
            Some(_) => errors.push(FieldError::new(
                format!("pipeline_data.{}", field),
                "must be an array of strings",
            )),
        }
    }

    match input.get("extraction_results") {
        None | Some(Value::Null) => {
            normalized.remove("extraction_results");
        }
        Some(Value::Array(_)) => {}
        Some(_) => errors.push(FieldError::new(
            "pipeline_data.extraction_results",
            "must be an array",
        )),
    }

    match input.get("pagination_state") {
        None | Some(Value::Null) => {
            normalized.remove("pagination_state");
        }
        Some(Value::Object(_)) => {}
        Some(_) => errors.push(FieldError::new(
            "pipeline_data.pagination_state",
            "must be an object",
        )),
    }

    normalized
}

fn check_timestamp(field: &str, value: &Value, errors: &mut Vec<FieldError>) {
    let valid = value
        .as_str()
        .is_some_and(|raw| timestamp::parse(raw).is_ok());
    if !valid {
        errors.push(FieldError::new(field, "must be an RFC 3339 timestamp"));
    }
}

/// Integer view of a JSON number, accepting integral floats
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

/// Round a JSON number that drifted to a float back to an integer
fn coerce_integer(value: &mut Value) {
    if value.is_i64() || value.is_u64() {
        return;
    }
    if let Some(f) = value.as_f64().filter(|f| f.is_finite()) {
        *value = Value::from(f.round() as i64);
    }
}

/// Prepare a record for the durable store
///
/// Populates `expires_at` (`now + ttl`) when absent and coerces the numeric
/// progress fields back to integers.
pub fn prepare_for_durable_store(
    data: Value,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<Document, ValidationError> {
    let Value::Object(mut document) = data else {
        return Err(ValidationError::single("$", "expected an object"));
    };

    if document.get("expires_at").map_or(true, Value::is_null) {
        let expires_at = timestamp::truncate(now) + ttl;
        document.insert("expires_at".into(), Value::from(timestamp::format(&expires_at)));
    }

    if let Some(step) = document.get_mut("pipeline_step") {
        coerce_integer(step);
    }

    if let Some(Value::Object(pipeline_data)) = document.get_mut("pipeline_data") {
        if let Some(page) = pipeline_data.get_mut("current_page") {
            coerce_integer(page);
        }
        if let Some(Value::Object(pagination)) = pipeline_data.get_mut("pagination_state") {
            for value in pagination.values_mut().filter(|v| v.is_number()) {
                coerce_integer(value);
            }
        }
    }

    Ok(document)
}

/// Strip durable-store-only identity before a record crosses into the cache
pub fn prepare_for_fast_tier(mut document: Document) -> Value {
    document.remove(STORE_ID_FIELD);
    Value::Object(document)
}

/// Whether the checkpoint's durable TTL marker lies in the past
pub fn is_expired(checkpoint: &Checkpoint, now: DateTime<Utc>) -> bool {
    checkpoint.is_expired_at(now)
}

/// Time elapsed since the checkpoint was created
pub fn get_age(checkpoint: &Checkpoint, now: DateTime<Utc>) -> Duration {
    checkpoint.age_at(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const ID: &str = "6f1c2a9e-3b4d-4c5e-8f70-123456789abc";

    fn minimal() -> Value {
        json!({
            "checkpoint_id": ID,
            "job_id": "job-42",
            "site_domain": "shop.example.com",
            "job_type": "product_catalog",
        })
    }

    #[test]
    fn test_validate_applies_defaults() {
        let now = Utc::now();
        let checkpoint = validate(&minimal(), now).unwrap();

        assert_eq!(checkpoint.status, CheckpointStatus::Active);
        assert_eq!(checkpoint.pipeline_step, 1);
        assert_eq!(checkpoint.pipeline_data.current_page, 1);
        assert!(checkpoint.pipeline_data.urls_discovered.is_empty());
        assert_eq!(checkpoint.created_at, timestamp::truncate(now));
        assert_eq!(checkpoint.updated_at, checkpoint.created_at);
        assert!(checkpoint.expires_at.is_none());
    }

    #[test]
    fn test_validate_reports_every_violation() {
        let data = json!({
            "checkpoint_id": "not-a-uuid",
            "job_id": "job-42",
            "site_domain": "bad domain!",
            "job_type": "weather",
            "status": "paused",
            "pipeline_step": 9,
            "pipeline_data": { "current_page": 0 },
        });

        let err = validate(&data, Utc::now()).unwrap_err();
        for field in [
            "checkpoint_id",
            "site_domain",
            "job_type",
            "status",
            "pipeline_step",
            "pipeline_data.current_page",
        ] {
            assert!(err.has_field(field), "missing error for {}", field);
        }
        assert_eq!(err.errors.len(), 6);
    }

    #[test]
    fn test_validate_rejects_non_integer_page() {
        let mut data = minimal();
        data["pipeline_data"] = json!({ "current_page": 2.5 });
        let err = validate(&data, Utc::now()).unwrap_err();
        assert!(err.has_field("pipeline_data.current_page"));

        data["pipeline_data"] = json!({ "current_page": 3.0 });
        let checkpoint = validate(&data, Utc::now()).unwrap();
        assert_eq!(checkpoint.pipeline_data.current_page, 3);
    }

    #[test]
    fn test_validate_rejects_uuid_v1() {
        let mut data = minimal();
        data["checkpoint_id"] = json!("6f1c2a9e-3b4d-1c5e-8f70-123456789abc");
        assert!(validate(&data, Utc::now()).unwrap_err().has_field("checkpoint_id"));
    }

    #[test]
    fn test_completed_requires_final_step() {
        let mut data = minimal();
        data["status"] = json!("completed");
        data["pipeline_step"] = json!(3);
        assert!(validate(&data, Utc::now()).unwrap_err().has_field("status"));

        data["pipeline_step"] = json!(4);
        assert!(validate(&data, Utc::now()).is_ok());
    }

    #[test]
    fn test_error_details_only_on_failed() {
        let mut data = minimal();
        data["error_details"] = json!({
            "message": "boom",
            "timestamp": "2026-10-19T10:00:00.000Z",
        });
        assert!(validate(&data, Utc::now()).unwrap_err().has_field("error_details"));

        data["status"] = json!("failed");
        let checkpoint = validate(&data, Utc::now()).unwrap();
        assert_eq!(checkpoint.error_details.unwrap().message, "boom");
    }

    #[test]
    fn test_validate_ignores_store_identity() {
        let mut data = minimal();
        data["_id"] = json!("internal-17");
        let checkpoint = validate(&data, Utc::now()).unwrap();
        let value = serde_json::to_value(checkpoint).unwrap();
        assert!(value.get("_id").is_none());
    }

    #[test]
    fn test_hostname_rules() {
        assert!(is_valid_hostname("shop.example.com"));
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("a-b.c0.io"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-shop.example.com"));
        assert!(!is_valid_hostname("shop..example.com"));
        assert!(!is_valid_hostname("shop.example.com."));
        assert!(!is_valid_hostname("https://shop.example.com"));
        assert!(!is_valid_hostname(&"a".repeat(64)));
    }

    #[test]
    fn test_prepare_for_durable_store() {
        let now = Utc::now();
        let mut data = minimal();
        data["pipeline_step"] = json!(2.0000001);
        data["pipeline_data"] = json!({ "current_page": 4.0, "pagination_state": { "offset": 40.0 } });

        let document = prepare_for_durable_store(data, now, Duration::days(7)).unwrap();

        assert_eq!(document["pipeline_step"], json!(2));
        assert_eq!(document["pipeline_data"]["current_page"], json!(4));
        assert_eq!(document["pipeline_data"]["pagination_state"]["offset"], json!(40));
        let expires_at = timestamp::parse(document["expires_at"].as_str().unwrap()).unwrap();
        assert_eq!(expires_at, timestamp::truncate(now) + Duration::days(7));
    }

    #[test]
    fn test_prepare_for_durable_store_keeps_existing_expiry() {
        let mut data = minimal();
        data["expires_at"] = json!("2030-01-01T00:00:00.000Z");
        let document = prepare_for_durable_store(data, Utc::now(), Duration::days(7)).unwrap();
        assert_eq!(document["expires_at"], json!("2030-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_prepare_for_fast_tier_strips_identity() {
        let mut document = minimal().as_object().unwrap().clone();
        document.insert("_id".into(), json!("row-1"));
        let value = prepare_for_fast_tier(document);
        assert!(value.get("_id").is_none());
        assert_eq!(value["job_id"], json!("job-42"));
    }

    fn arbitrary_record() -> impl Strategy<Value = Value> {
        (
            "[a-z0-9-]{1,16}",
            prop::sample::select(vec!["shop.example.com", "example.org", "localhost"]),
            prop::sample::select(JobType::ALL.to_vec()),
            1u8..=4,
            prop::collection::vec("/[a-z]{1,8}", 0..5),
            1u32..50,
            prop::option::of(prop::sample::select(vec!["a", "b"])),
        )
            .prop_map(|(job_id, domain, job_type, step, urls, page, tag)| {
                let mut data = json!({
                    "checkpoint_id": uuid::Uuid::new_v4().to_string(),
                    "job_id": job_id,
                    "site_domain": domain,
                    "job_type": job_type.as_str(),
                    "pipeline_step": step,
                    "pipeline_data": { "urls_discovered": urls, "current_page": page },
                });
                if let Some(tag) = tag {
                    data["metadata"] = json!({ "tag": tag });
                    data["pipeline_data"]["main_categories"] = json!([tag]);
                }
                data
            })
    }

    proptest! {
        #[test]
        fn prop_validate_is_idempotent(data in arbitrary_record()) {
            let now = Utc::now();
            let once = validate(&data, now).unwrap();
            let twice = validate(&serde_json::to_value(&once).unwrap(), now).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
