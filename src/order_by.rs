//! Order-by clauses: `(<scope>.)?<key>( ASC|DESC)?`.
//!
//! Every ordered column gets a rank expression `order_null_i` that is
//! selected and ordered first, so NULLs sort last in both directions. For
//! metrics the rank is three-valued: real values 0, NaN 1, NULL 2.
//!
//! Ordering always ends with `runs.start_time DESC` (unless start time was
//! already ordered on) and `runs.run_uuid`, which keeps pages stable.

use sea_query::{CaseStatement, Expr, JoinType, Order, Query, SelectStatement, SimpleExpr};
use tracing::debug;

use crate::ast::Scope;
use crate::dialect::Dialect;
use crate::error::{Result, SearchError};
use crate::schema::{KeyValueColumn, KeyValueTable, Runs, SubqueryAlias};

/// One parsed order-by clause. `scope` is `None` for a bare key, which
/// orders by a run attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByExpr {
    pub scope: Option<Scope>,
    pub key: String,
    pub desc: bool,
}

impl OrderByExpr {
    fn is_attribute(&self) -> bool {
        matches!(self.scope, None | Some(Scope::Attribute))
    }
}

fn invalid_clause(clause: &str) -> SearchError {
    SearchError::BadRequest(format!("invalid order_by clause '{}'", clause))
}

/// Splits on spaces outside of quotes. Quotes (`"`, `'`, backtick) are
/// dropped and their content kept verbatim.
fn split_with_quotes(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.trim().chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                ' ' => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                '"' | '\'' | '`' => quote = Some(c),
                _ => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn order_scope(scope: &str) -> Option<Scope> {
    match scope.to_ascii_lowercase().as_str() {
        "metric" | "metrics" => Some(Scope::Metric),
        "parameter" | "parameters" | "param" | "params" => Some(Scope::Parameter),
        "tag" | "tags" => Some(Scope::Tag),
        "attribute" | "attributes" | "attr" | "run" => Some(Scope::Attribute),
        _ => None,
    }
}

/// Canonical attribute column for an order-by key.
fn order_attribute_key(key: &str) -> Option<String> {
    let lowered = key.to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "created" => "start_time",
        "run_name" | "run name" => "name",
        "run_id" => "run_uuid",
        other => other,
    };
    Runs::from_key(canonical).map(|_| canonical.to_string())
}

/// Parses one order-by clause.
pub fn parse_order_by_clause(clause: &str) -> Result<OrderByExpr> {
    let parts = split_with_quotes(clause);
    let (column, direction) = match parts.as_slice() {
        [column] => (column.as_str(), None),
        [column, direction] => (column.as_str(), Some(direction.as_str())),
        _ => return Err(invalid_clause(clause)),
    };

    let desc = match direction.map(str::to_ascii_uppercase).as_deref() {
        None | Some("ASC") => false,
        Some("DESC") => true,
        Some(_) => return Err(invalid_clause(clause)),
    };

    let (scope, key) = match column.split_once('.') {
        Some((scope, key)) => (Some(order_scope(scope).ok_or_else(|| invalid_clause(clause))?), key),
        None => (None, column),
    };
    if key.is_empty() {
        return Err(invalid_clause(clause));
    }

    let key = match scope {
        None | Some(Scope::Attribute) => {
            order_attribute_key(key).ok_or_else(|| invalid_clause(clause))?
        }
        Some(_) => key.to_string(),
    };

    let expr = OrderByExpr { scope, key, desc };
    debug!(
        scope = ?expr.scope,
        key = %expr.key,
        desc = expr.desc,
        "parsed order_by clause"
    );
    Ok(expr)
}

pub fn parse_order_by(clauses: &[String]) -> Result<Vec<OrderByExpr>> {
    clauses.iter().map(|c| parse_order_by_clause(c)).collect()
}

/// Appends order-by joins, rank columns and orderings for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct OrderByCompiler {
    dialect: Dialect,
}

impl OrderByCompiler {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn apply(&self, select: &mut SelectStatement, clauses: &[OrderByExpr]) -> Result<()> {
        let mut orders_start_time = false;

        for (index, clause) in clauses.iter().enumerate() {
            let direction = if clause.desc { Order::Desc } else { Order::Asc };
            let rank_alias = SubqueryAlias::OrderNull(index);

            let (column, rank): (SimpleExpr, CaseStatement) = if clause.is_attribute() {
                let column = Runs::from_key(&clause.key)
                    .ok_or_else(|| invalid_clause(&clause.key))?;
                if column == Runs::StartTime {
                    orders_start_time = true;
                }
                let column_ref = Expr::col((Runs::Table, column));
                (
                    column_ref.clone().into(),
                    Expr::case(column_ref.is_null(), rank_literal(1)).finally(rank_literal(0)),
                )
            } else {
                self.join_order_table(select, index, clause)?
            };

            select.expr_as(rank, rank_alias);
            select.order_by(rank_alias, Order::Asc);
            select.order_by_expr(column, direction);
        }

        if !orders_start_time {
            select.order_by((Runs::Table, Runs::StartTime), Order::Desc);
        }
        select.order_by((Runs::Table, Runs::RunUuid), Order::Asc);
        Ok(())
    }

    /// Left-joins the key/value table an order clause reads from and returns
    /// the ordered column with its rank expression.
    fn join_order_table(
        &self,
        select: &mut SelectStatement,
        index: usize,
        clause: &OrderByExpr,
    ) -> Result<(SimpleExpr, CaseStatement)> {
        let table = clause
            .scope
            .and_then(KeyValueTable::for_scope)
            .ok_or_else(|| invalid_clause(&clause.key))?;
        let alias = SubqueryAlias::Order(index);
        let is_metric = table == KeyValueTable::LatestMetrics;

        let mut subquery = Query::select();
        subquery
            .columns([KeyValueColumn::RunUuid, KeyValueColumn::Value])
            .from(table)
            .and_where(Expr::col(KeyValueColumn::Key).eq(clause.key.as_str()));
        if is_metric {
            subquery.column(KeyValueColumn::IsNan);
        }

        select.join_subquery(
            JoinType::LeftJoin,
            subquery,
            alias,
            Expr::col((Runs::Table, Runs::RunUuid)).equals((alias, KeyValueColumn::RunUuid)),
        );

        let value = Expr::col((alias, KeyValueColumn::Value));
        let rank = if is_metric {
            Expr::case(
                Expr::col((alias, KeyValueColumn::IsNan))
                    .eq(Expr::cust(self.dialect.bool_true_literal())),
                rank_literal(1),
            )
            .case(value.clone().is_null(), rank_literal(2))
            .finally(rank_literal(0))
        } else {
            Expr::case(value.clone().is_null(), rank_literal(1)).finally(rank_literal(0))
        };
        Ok((value.into(), rank))
    }
}

/// Rank literals are inlined so they never take a bind position.
fn rank_literal(value: u8) -> SimpleExpr {
    Expr::cust(value.to_string())
}
