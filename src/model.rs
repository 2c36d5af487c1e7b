//! Rows loaded from the tracking store for a search page.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Active,
    Deleted,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::Active => "active",
            LifecycleStage::Deleted => "deleted",
        }
    }
}

/// Which lifecycle stages a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewType {
    ActiveOnly = 1,
    DeletedOnly = 2,
    #[default]
    All = 3,
}

impl ViewType {
    pub fn lifecycle_stages(self) -> &'static [LifecycleStage] {
        match self {
            ViewType::ActiveOnly => &[LifecycleStage::Active],
            ViewType::DeletedOnly => &[LifecycleStage::Deleted],
            ViewType::All => &[LifecycleStage::Active, LifecycleStage::Deleted],
        }
    }
}

/// A `runs` row with its preloaded satellite rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunRow {
    pub run_uuid: String,
    pub name: Option<String>,
    pub source_type: Option<String>,
    pub experiment_id: i64,
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub artifact_uri: Option<String>,
    pub lifecycle_stage: Option<String>,
    pub latest_metrics: Vec<LatestMetricRow>,
    pub params: Vec<ParamRow>,
    pub tags: Vec<TagRow>,
    pub inputs: Vec<InputRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatestMetricRow {
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
    pub step: i64,
    pub is_nan: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRow {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRow {
    pub key: String,
    pub value: String,
}

/// An `inputs` row whose destination is a run, with the dataset it points at
/// and its `input_tags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    pub input_uuid: String,
    pub dataset: DatasetRow,
    pub tags: Vec<InputTagRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub dataset_uuid: String,
    pub experiment_id: i64,
    pub name: String,
    pub digest: String,
    pub source_type: String,
    pub source: String,
    pub schema: Option<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTagRow {
    pub name: String,
    pub value: String,
}
