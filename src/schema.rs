//! Table and column identifiers of the tracking store.

use sea_query::Iden;

use crate::ast::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Iden)]
pub enum Runs {
    Table,
    RunUuid,
    Name,
    SourceType,
    ExperimentId,
    UserId,
    Status,
    StartTime,
    EndTime,
    ArtifactUri,
    LifecycleStage,
}

impl Runs {
    /// Columns loaded into a run row, in row order.
    pub const ROW_COLUMNS: [Runs; 10] = [
        Runs::RunUuid,
        Runs::Name,
        Runs::SourceType,
        Runs::ExperimentId,
        Runs::UserId,
        Runs::Status,
        Runs::StartTime,
        Runs::EndTime,
        Runs::ArtifactUri,
        Runs::LifecycleStage,
    ];

    /// Resolves a canonical attribute key (filter or order-by) to its column.
    pub fn from_key(key: &str) -> Option<Runs> {
        match key {
            "run_uuid" => Some(Runs::RunUuid),
            "name" => Some(Runs::Name),
            "experiment_id" => Some(Runs::ExperimentId),
            "user_id" => Some(Runs::UserId),
            "status" => Some(Runs::Status),
            "start_time" => Some(Runs::StartTime),
            "end_time" => Some(Runs::EndTime),
            "artifact_uri" => Some(Runs::ArtifactUri),
            "lifecycle_stage" => Some(Runs::LifecycleStage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Iden)]
pub enum LatestMetrics {
    Table,
    RunUuid,
    Key,
    Value,
    Timestamp,
    Step,
    IsNan,
}

#[derive(Debug, Clone, Copy, Iden)]
pub enum Params {
    Table,
    RunUuid,
    Key,
    Value,
}

#[derive(Debug, Clone, Copy, Iden)]
pub enum Tags {
    Table,
    RunUuid,
    Key,
    Value,
}

#[derive(Debug, Clone, Copy, Iden)]
pub enum Datasets {
    Table,
    DatasetUuid,
    ExperimentId,
    Name,
    Digest,
    DatasetSourceType,
    DatasetSource,
    DatasetSchema,
    DatasetProfile,
}

#[derive(Debug, Clone, Copy, Iden)]
pub enum Inputs {
    Table,
    InputUuid,
    SourceType,
    SourceId,
    DestinationType,
    DestinationId,
}

#[derive(Debug, Clone, Copy, Iden)]
pub enum InputTags {
    Table,
    InputUuid,
    Name,
    Value,
}

/// The key/value satellite tables metrics, params and tags are joined from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValueTable {
    LatestMetrics,
    Params,
    Tags,
}

impl KeyValueTable {
    pub fn for_scope(scope: Scope) -> Option<Self> {
        match scope {
            Scope::Metric => Some(KeyValueTable::LatestMetrics),
            Scope::Parameter => Some(KeyValueTable::Params),
            Scope::Tag => Some(KeyValueTable::Tags),
            Scope::Attribute | Scope::Dataset => None,
        }
    }
}

impl Iden for KeyValueTable {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let name = match self {
            KeyValueTable::LatestMetrics => "latest_metrics",
            KeyValueTable::Params => "params",
            KeyValueTable::Tags => "tags",
        };
        write!(s, "{}", name).unwrap();
    }
}

/// Columns shared by the key/value tables and by the derived tables joined
/// from them.
#[derive(Debug, Clone, Copy, Iden)]
pub enum KeyValueColumn {
    RunUuid,
    ExperimentId,
    Key,
    Value,
    IsNan,
}

/// Aliases of derived tables and auxiliary select expressions; `i` is the
/// position of the clause that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryAlias {
    Filter(usize),
    Order(usize),
    OrderNull(usize),
}

impl Iden for SubqueryAlias {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        match self {
            SubqueryAlias::Filter(i) => write!(s, "filter_{}", i).unwrap(),
            SubqueryAlias::Order(i) => write!(s, "order_{}", i).unwrap(),
            SubqueryAlias::OrderNull(i) => write!(s, "order_null_{}", i).unwrap(),
        }
    }
}
