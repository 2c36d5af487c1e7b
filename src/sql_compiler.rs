//! Compiles validated filter clauses into joins and predicates on a
//! `SelectStatement` rooted at `runs`.
//!
//! Each clause at position `i` becomes one of:
//!
//! - attribute: `WHERE runs.<key> <op> ?`
//! - metric / param / tag:
//!   `JOIN (SELECT run_uuid, value FROM <table> WHERE key = ? AND value <op> ?) AS filter_i
//!    ON runs.run_uuid = filter_i.run_uuid`
//! - dataset name / digest:
//!   `JOIN (SELECT DISTINCT experiment_id FROM datasets WHERE <key> <op> ?) AS filter_i
//!    ON runs.experiment_id = filter_i.experiment_id`
//! - dataset context: a join through `inputs` and `input_tags` on the
//!   `mlflow.data.context` tag, restricted to inputs whose destination is a run.
//!
//! `attributes.run_name` is stored as the `mlflow.runName` tag and compiles as
//! a tag clause.

use sea_query::{Condition, Expr, JoinType, Query, SelectStatement, SimpleExpr};
use tracing::debug;

use crate::ast::{OperatorKind, Scope, ValidCompareExpr, Value};
use crate::dialect::Dialect;
use crate::error::{Result, SearchError};
use crate::schema::{
    Datasets, InputTags, Inputs, KeyValueColumn, KeyValueTable, Runs, SubqueryAlias,
};

pub const RUN_NAME_TAG: &str = "mlflow.runName";
pub const DATASET_CONTEXT_TAG: &str = "mlflow.data.context";

/// Appends filter joins and predicates for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler {
    dialect: Dialect,
}

impl FilterCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Applies every clause to `select`. Clause positions name the join
    /// aliases, so the same filter always yields the same SQL.
    pub fn apply(&self, select: &mut SelectStatement, clauses: &[ValidCompareExpr]) -> Result<()> {
        for (index, clause) in clauses.iter().enumerate() {
            self.apply_clause(select, index, clause)?;
        }
        Ok(())
    }

    fn apply_clause(
        &self,
        select: &mut SelectStatement,
        index: usize,
        clause: &ValidCompareExpr,
    ) -> Result<()> {
        let (scope, key) = match (clause.scope, clause.key.as_str()) {
            (Scope::Attribute, "run_name") => (Scope::Tag, RUN_NAME_TAG),
            (scope, key) => (scope, key),
        };
        debug!(
            index,
            scope = %scope,
            key,
            op = %clause.op,
            dialect = %self.dialect,
            "compiling filter clause"
        );

        match scope {
            Scope::Attribute => {
                let column = Runs::from_key(key).ok_or_else(|| {
                    SearchError::BadRequest(format!(
                        "Invalid attribute key '{{{}}}' specified",
                        key
                    ))
                })?;
                let predicate =
                    self.compare(Expr::col((Runs::Table, column)).into(), clause.op, &clause.value)?;
                select.and_where(predicate);
            }
            Scope::Metric | Scope::Parameter | Scope::Tag => {
                // `for_scope` only returns None for attributes and datasets.
                if let Some(table) = KeyValueTable::for_scope(scope) {
                    self.join_key_value(select, index, table, key, clause)?;
                }
            }
            Scope::Dataset if key == "context" => self.join_dataset_context(select, index, clause)?,
            Scope::Dataset => self.join_dataset_column(select, index, key, clause)?,
        }
        Ok(())
    }

    fn join_key_value(
        &self,
        select: &mut SelectStatement,
        index: usize,
        table: KeyValueTable,
        key: &str,
        clause: &ValidCompareExpr,
    ) -> Result<()> {
        let alias = SubqueryAlias::Filter(index);
        let mut subquery = Query::select();
        subquery
            .columns([KeyValueColumn::RunUuid, KeyValueColumn::Value])
            .from(table)
            .and_where(Expr::col(KeyValueColumn::Key).eq(key))
            .and_where(self.compare(
                Expr::col(KeyValueColumn::Value).into(),
                clause.op,
                &clause.value,
            )?);

        select.join_subquery(
            JoinType::Join,
            subquery,
            alias,
            Expr::col((Runs::Table, Runs::RunUuid)).equals((alias, KeyValueColumn::RunUuid)),
        );
        Ok(())
    }

    fn join_dataset_column(
        &self,
        select: &mut SelectStatement,
        index: usize,
        key: &str,
        clause: &ValidCompareExpr,
    ) -> Result<()> {
        let column = match key {
            "name" => Datasets::Name,
            "digest" => Datasets::Digest,
            other => {
                return Err(SearchError::BadRequest(format!(
                    "Invalid dataset key '{{{}}}' specified",
                    other
                )))
            }
        };

        let alias = SubqueryAlias::Filter(index);
        let mut subquery = Query::select();
        subquery
            .distinct()
            .column(Datasets::ExperimentId)
            .from(Datasets::Table)
            .and_where(self.compare(Expr::col(column).into(), clause.op, &clause.value)?);

        select.join_subquery(
            JoinType::Join,
            subquery,
            alias,
            Expr::col((Runs::Table, Runs::ExperimentId))
                .equals((alias, KeyValueColumn::ExperimentId)),
        );
        Ok(())
    }

    fn join_dataset_context(
        &self,
        select: &mut SelectStatement,
        index: usize,
        clause: &ValidCompareExpr,
    ) -> Result<()> {
        let alias = SubqueryAlias::Filter(index);
        let tag_value = self.compare(
            Expr::col((InputTags::Table, InputTags::Value)).into(),
            clause.op,
            &clause.value,
        )?;

        let mut subquery = Query::select();
        subquery
            .distinct()
            .expr_as(
                Expr::col((Inputs::Table, Inputs::DestinationId)),
                KeyValueColumn::RunUuid,
            )
            .from(Inputs::Table)
            .join(
                JoinType::Join,
                InputTags::Table,
                Condition::all()
                    .add(
                        Expr::col((Inputs::Table, Inputs::InputUuid))
                            .equals((InputTags::Table, InputTags::InputUuid)),
                    )
                    .add(
                        Expr::col((InputTags::Table, InputTags::Name))
                            .eq(Expr::cust(format!("'{}'", DATASET_CONTEXT_TAG))),
                    )
                    .add(tag_value),
            )
            .and_where(
                Expr::col((Inputs::Table, Inputs::DestinationType)).eq(Expr::cust("'RUN'")),
            );

        select.join_subquery(
            JoinType::Join,
            subquery,
            alias,
            Expr::col((Runs::Table, Runs::RunUuid)).equals((alias, KeyValueColumn::RunUuid)),
        );
        Ok(())
    }

    /// `column <op> value`, with the dialect's case-insensitive match for
    /// `ILIKE`.
    fn compare(&self, column: SimpleExpr, op: OperatorKind, value: &Value) -> Result<SimpleExpr> {
        let expr = match (op, value) {
            (OperatorKind::ILike, Value::String(pattern)) => self.dialect.ilike(column, pattern),
            (OperatorKind::Like, Value::String(pattern)) => {
                Expr::expr(column).like(pattern.as_str())
            }
            (OperatorKind::In, Value::StringList(values)) => {
                Expr::expr(column).is_in(values.iter().cloned())
            }
            (OperatorKind::NotIn, Value::StringList(values)) => {
                Expr::expr(column).is_not_in(values.iter().cloned())
            }
            (OperatorKind::In | OperatorKind::NotIn | OperatorKind::Like | OperatorKind::ILike, _)
            | (_, Value::StringList(_)) => return Err(mismatch(op, value)),
            (op, Value::Number(n)) => binary(Expr::expr(column), op, *n),
            (op, Value::String(s)) => binary(Expr::expr(column), op, s.as_str()),
        };
        Ok(expr)
    }
}

fn binary<V: Into<SimpleExpr>>(column: Expr, op: OperatorKind, literal: V) -> SimpleExpr {
    match op {
        OperatorKind::Equals => column.eq(literal),
        OperatorKind::NotEquals => column.ne(literal),
        OperatorKind::Less => column.lt(literal),
        OperatorKind::LessEquals => column.lte(literal),
        OperatorKind::Greater => column.gt(literal),
        // Pattern and set operators are matched before reaching here.
        _ => column.gte(literal),
    }
}

fn mismatch(op: OperatorKind, value: &Value) -> SearchError {
    SearchError::BadRequest(format!(
        "comparator '{}' cannot be used with a {} value",
        op,
        value.kind_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::parse_filter;
    use sea_query::{Alias, Values};

    fn compile(filter: &str, dialect: Dialect) -> (String, Values) {
        let clauses = parse_filter(filter).unwrap();
        let mut select = Query::select();
        select
            .column((Runs::Table, Runs::RunUuid))
            .from(Runs::Table);
        FilterCompiler::new(dialect).apply(&mut select, &clauses).unwrap();
        dialect.build(&select)
    }

    fn strings(values: &Values) -> Vec<String> {
        values.0.iter().map(|v| format!("{:?}", v)).collect()
    }

    #[test]
    fn test_metric_join_sqlite() {
        let (sql, values) = compile("metrics.accuracy > 0.72", Dialect::Sqlite);
        assert_eq!(
            sql,
            r#"SELECT "runs"."run_uuid" FROM "runs" JOIN (SELECT "run_uuid", "value" FROM "latest_metrics" WHERE "key" = ? AND "value" > ?) AS "filter_0" ON "runs"."run_uuid" = "filter_0"."run_uuid""#
        );
        assert_eq!(
            values.0,
            vec![
                sea_query::Value::String(Some(Box::new("accuracy".to_string()))),
                sea_query::Value::Double(Some(0.72)),
            ]
        );
    }

    #[test]
    fn test_two_joins_postgres() {
        let (sql, values) = compile(
            "metrics.accuracy > 0.72 AND params.batch_size = '2'",
            Dialect::Postgres,
        );
        assert!(sql.contains(r#"FROM "latest_metrics" WHERE "key" = $1 AND "value" > $2) AS "filter_0""#));
        assert!(sql.contains(r#"FROM "params" WHERE "key" = $3 AND "value" = $4) AS "filter_1""#));
        assert_eq!(sql.matches("JOIN").count(), 2);
        assert_eq!(values.0.len(), 4);
        assert_eq!(
            values.0[3],
            sea_query::Value::String(Some(Box::new("2".to_string())))
        );
    }

    #[test]
    fn test_tag_ilike_sqlite_is_lowered() {
        let (sql, values) = compile(
            "tags.environment = 'notebook' AND tags.task ILIKE 'Classif%'",
            Dialect::Sqlite,
        );
        assert!(!sql.contains("ILIKE"));
        assert!(sql.contains(r#"LOWER("value") LIKE ?"#), "{}", sql);
        assert!(strings(&values).last().unwrap().contains("classif%"));
    }

    #[test]
    fn test_ilike_native_postgres() {
        let (sql, _) = compile("params.solver ILIKE 'L%'", Dialect::Postgres);
        assert!(sql.contains(r#""value" ILIKE $2"#), "{}", sql);
    }

    #[test]
    fn test_run_name_compiles_as_tag() {
        let (sql, values) = compile("attributes.run_name ILIKE 'my-run%'", Dialect::Postgres);
        assert!(sql.contains(r#"FROM "tags" WHERE "key" = $1 AND ("value" ILIKE $2)"#), "{}", sql);
        assert_eq!(
            values.0,
            vec![
                sea_query::Value::String(Some(Box::new("mlflow.runName".to_string()))),
                sea_query::Value::String(Some(Box::new("my-run%".to_string()))),
            ]
        );
    }

    #[test]
    fn test_attribute_predicates() {
        let (sql, values) = compile(
            "status = 'FINISHED' AND start_time >= 10 AND run_id IN ('a', 'b')",
            Dialect::Sqlite,
        );
        assert_eq!(
            sql,
            r#"SELECT "runs"."run_uuid" FROM "runs" WHERE "runs"."status" = ? AND "runs"."start_time" >= ? AND "runs"."run_uuid" IN (?, ?)"#
        );
        assert_eq!(values.0.len(), 4);
    }

    #[test]
    fn test_attribute_ilike_mysql() {
        let (sql, _) = compile("user_id ILIKE 'Alice%'", Dialect::MySql);
        assert!(sql.contains("LOWER(`runs`.`user_id`) LIKE ?"), "{}", sql);
    }

    #[test]
    fn test_dataset_name_join() {
        let (sql, _) = compile("datasets.name IN ('train', 'eval')", Dialect::Postgres);
        assert!(sql.contains(
            r#"JOIN (SELECT DISTINCT "experiment_id" FROM "datasets" WHERE "name" IN ($1, $2)) AS "filter_0" ON "runs"."experiment_id" = "filter_0"."experiment_id""#
        ), "{}", sql);
    }

    #[test]
    fn test_dataset_context_join() {
        let (sql, values) = compile("datasets.context = 'train'", Dialect::Postgres);
        assert!(sql.contains(r#""inputs"."destination_id" AS "run_uuid""#), "{}", sql);
        assert!(sql.contains(r#""input_tags"."name" = ('mlflow.data.context')"#), "{}", sql);
        assert!(sql.contains(r#""input_tags"."value" = $1"#), "{}", sql);
        assert!(sql.contains(r#"WHERE "inputs"."destination_type" = ('RUN')"#), "{}", sql);
        assert!(sql.ends_with(r#"AS "filter_0" ON "runs"."run_uuid" = "filter_0"."run_uuid""#));
        assert_eq!(values.0.len(), 1);
    }

    #[test]
    fn test_sqlserver_placeholders() {
        let (sql, _) = compile("params.a = 'x' AND tags.b = 'y'", Dialect::SqlServer);
        assert!(sql.contains("@p1") && sql.contains("@p4"), "{}", sql);
        assert!(!sql.contains('$'));
    }

    #[test]
    fn test_empty_filter_adds_nothing() {
        let (sql, values) = compile("", Dialect::Sqlite);
        assert_eq!(sql, r#"SELECT "runs"."run_uuid" FROM "runs""#);
        assert!(values.0.is_empty());
    }

    #[test]
    fn test_mismatched_value_is_rejected() {
        let clause = ValidCompareExpr {
            scope: Scope::Metric,
            key: "m".into(),
            op: OperatorKind::Like,
            value: Value::Number(1.0),
        };
        let mut select = Query::select();
        select.column(Alias::new("x")).from(Runs::Table);
        let err = FilterCompiler::new(Dialect::Sqlite)
            .apply(&mut select, &[clause])
            .unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }
}
