//! Converts run rows into the `Run` response shape.

use serde::{Serialize, Serializer};

use crate::model::{InputRow, LatestMetricRow, RunRow};
use crate::sql_compiler::RUN_NAME_TAG;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    /// Case-insensitive; unknown or empty statuses map to `None`.
    pub fn parse(status: &str) -> Option<Self> {
        match status.to_ascii_uppercase().as_str() {
            "RUNNING" => Some(RunStatus::Running),
            "SCHEDULED" => Some(RunStatus::Scheduled),
            "FINISHED" => Some(RunStatus::Finished),
            "FAILED" => Some(RunStatus::Failed),
            "KILLED" => Some(RunStatus::Killed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub info: RunInfo,
    pub data: RunData,
    pub inputs: RunInputs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInfo {
    pub run_id: String,
    pub run_uuid: String,
    pub run_name: String,
    pub experiment_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub artifact_uri: String,
    pub lifecycle_stage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunData {
    pub metrics: Vec<Metric>,
    pub params: Vec<Param>,
    pub tags: Vec<RunTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub key: String,
    #[serde(serialize_with = "serialize_float")]
    pub value: f64,
    pub timestamp: i64,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInputs {
    pub dataset_inputs: Vec<DatasetInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetInput {
    pub tags: Vec<InputTag>,
    pub dataset: Dataset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputTag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub name: String,
    pub digest: String,
    pub source_type: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// JSON has no NaN or infinities; they are written as the strings protobuf
/// JSON uses.
fn serialize_float<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        serializer.serialize_f64(*value)
    }
}

fn metric(row: LatestMetricRow) -> Metric {
    Metric {
        key: row.key,
        value: if row.is_nan { f64::NAN } else { row.value },
        timestamp: row.timestamp,
        step: row.step,
    }
}

fn dataset_input(row: InputRow) -> DatasetInput {
    DatasetInput {
        tags: row
            .tags
            .into_iter()
            .map(|t| InputTag {
                key: t.name,
                value: t.value,
            })
            .collect(),
        dataset: Dataset {
            name: row.dataset.name,
            digest: row.dataset.digest,
            source_type: row.dataset.source_type,
            source: row.dataset.source,
            schema: row.dataset.schema,
            profile: row.dataset.profile,
        },
    }
}

/// Builds the response shape for one row. Output arrays keep the order of
/// the preloaded rows.
pub fn materialize(row: RunRow) -> Run {
    // Runs logged by old clients have an empty `name`; their name lives in
    // the `mlflow.runName` tag.
    let run_name = match row.name.filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => row
            .tags
            .iter()
            .find(|t| t.key == RUN_NAME_TAG)
            .map(|t| t.value.clone())
            .unwrap_or_default(),
    };

    Run {
        info: RunInfo {
            run_id: row.run_uuid.clone(),
            run_uuid: row.run_uuid,
            run_name,
            experiment_id: row.experiment_id.to_string(),
            user_id: row.user_id.unwrap_or_default(),
            status: row.status.as_deref().and_then(RunStatus::parse),
            start_time: row.start_time.unwrap_or_default(),
            end_time: row.end_time,
            artifact_uri: row.artifact_uri.unwrap_or_default(),
            lifecycle_stage: row.lifecycle_stage.unwrap_or_default(),
        },
        data: RunData {
            metrics: row.latest_metrics.into_iter().map(metric).collect(),
            params: row
                .params
                .into_iter()
                .map(|p| Param {
                    key: p.key,
                    value: p.value,
                })
                .collect(),
            tags: row
                .tags
                .into_iter()
                .map(|t| RunTag {
                    key: t.key,
                    value: t.value,
                })
                .collect(),
        },
        inputs: RunInputs {
            dataset_inputs: row.inputs.into_iter().map(dataset_input).collect(),
        },
    }
}
