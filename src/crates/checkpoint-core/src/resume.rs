//! Resume-point computation
//!
//! Given the latest checkpoint for a job, decide which pipeline step to run
//! next and which artifacts from the finished steps to hand it.
//!
//! Progress evidence is the only signal available: if any of the progress
//! arrays is non-empty, the recorded step is assumed finished. A step that
//! crashed half way through its writes looks the same as one that completed,
//! so the heuristic can over-advance as well as under-advance.

use checkpoint_store::{CheckpointRecord, CheckpointStatus, PipelineData, MAX_PIPELINE_STEP, MIN_PIPELINE_STEP};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where an interrupted job should continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub can_resume: bool,

    /// Pipeline step to run next
    pub start_step: u8,

    /// The checkpoint the decision was made from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointRecord>,

    /// Artifacts produced by the last finished step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_outputs: Option<Map<String, Value>>,
}

impl ResumePoint {
    /// No checkpoint: start from the beginning
    pub fn fresh() -> Self {
        Self {
            can_resume: false,
            start_step: MIN_PIPELINE_STEP,
            checkpoint: None,
            previous_outputs: None,
        }
    }

    /// Decide from the latest checkpoint
    ///
    /// Oversized stubs carry no progress arrays; the payload only outgrew its
    /// budget because progress was recorded, so they count as having progress.
    pub fn from_record(record: CheckpointRecord) -> Self {
        let step = record.pipeline_step();

        if record.status() == CheckpointStatus::Completed {
            let previous_outputs = record
                .pipeline_data()
                .and_then(|data| previous_outputs(data, MAX_PIPELINE_STEP));
            return Self {
                can_resume: false,
                start_step: MAX_PIPELINE_STEP,
                checkpoint: Some(record),
                previous_outputs,
            };
        }

        let has_progress = record.pipeline_data().map_or(true, PipelineData::has_progress);
        let start_step = if has_progress && step < MAX_PIPELINE_STEP {
            step + 1
        } else {
            step
        };

        let previous_outputs = record
            .pipeline_data()
            .and_then(|data| previous_outputs(data, start_step.saturating_sub(1)));

        Self {
            can_resume: true,
            start_step,
            checkpoint: Some(record),
            previous_outputs,
        }
    }
}

/// Fields each finished step hands to the next one
fn output_fields(completed_step: u8) -> &'static [&'static str] {
    match completed_step {
        1 => &["main_categories"],
        2 => &["main_categories", "subcategories"],
        3 => &["urls_discovered"],
        4 => &["extraction_results"],
        _ => &[],
    }
}

/// Collect the outputs of `completed_step`; `None` when it produced none
pub fn previous_outputs(data: &PipelineData, completed_step: u8) -> Option<Map<String, Value>> {
    let mut outputs = Map::new();

    for &field in output_fields(completed_step) {
        let value = match field {
            "urls_discovered" => Some(Value::from(data.urls_discovered.clone())),
            "extraction_results" => Some(Value::Array(data.extraction_results.clone())),
            other => data.field(other).cloned(),
        };
        if let Some(value) = value {
            outputs.insert(field.to_string(), value);
        }
    }

    if outputs.is_empty() {
        None
    } else {
        Some(outputs)
    }
}
