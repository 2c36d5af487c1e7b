//! The search driver: composes the runs query for one request, runs it on a
//! [`RunStore`] and pages the materialized result.
//!
//! ```text
//! page_token ──► offset
//! filter ──► lex ► parse ► validate ──► FilterCompiler ─┐
//! order_by ──► parse ──────────────────► OrderByCompiler ┤
//! experiment_ids, view type ──► runs WHERE ... ─────────┴─► LIMIT/OFFSET
//!                                     │
//!                     RunStore::fetch_runs (query + preloads)
//!                                     │
//!                    materialize ──► PagedList { items, next_page_token }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sea_query::{Expr, Query, SelectStatement, Values};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::error::{Result, SearchError};
use crate::materialize::{materialize, Run};
use crate::model::{RunRow, ViewType};
use crate::order_by::{parse_order_by, OrderByCompiler};
use crate::page_token;
use crate::schema::Runs;
use crate::sql_compiler::FilterCompiler;
use crate::validate::parse_filter;

pub const DEFAULT_MAX_RESULTS: i32 = 1000;
pub const MAX_RESULTS_LIMIT: i32 = 50_000;

/// Request-scoped cancellation flag, shared with whatever executes the
/// request's statements.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation handle and optional deadline of one search request.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    cancellation: CancellationHandle,
    deadline: Option<Instant>,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn should_abort(&self) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns `Cancelled` once the request was cancelled or its deadline
    /// passed.
    pub fn check(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(SearchError::Cancelled("request was cancelled".to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SearchError::Cancelled("request deadline exceeded".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRunsRequest {
    pub experiment_ids: Vec<String>,
    pub filter: String,
    /// Unset means all lifecycle stages.
    pub run_view_type: Option<ViewType>,
    pub max_results: Option<i32>,
    pub order_by: Vec<String>,
    pub page_token: String,
}

/// Page size for a request, whether it came from the request or the
/// configured default.
fn resolve_max_results(max_results: i32) -> Result<u64> {
    if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
        return Err(SearchError::InvalidParameterValue(format!(
            "Invalid value {} for parameter 'max_results' supplied. It must be at most {}",
            max_results, MAX_RESULTS_LIMIT
        )));
    }
    Ok(max_results as u64)
}

impl SearchRunsRequest {
    /// Checks the fields that do not need the filter grammar.
    pub fn validate(&self) -> Result<()> {
        if let Some(max_results) = self.max_results {
            resolve_max_results(max_results)?;
        }
        self.parsed_experiment_ids().map(|_| ())
    }

    fn parsed_experiment_ids(&self) -> Result<Vec<i64>> {
        self.experiment_ids
            .iter()
            .map(|id| {
                id.trim().parse::<i64>().map_err(|_| {
                    SearchError::InvalidParameterValue(format!(
                        "Invalid value '{}' for parameter 'experiment_ids': must be an integer",
                        id
                    ))
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRunsResponse {
    pub runs: Vec<Run>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub next_page_token: String,
}

/// One page of results. `next_page_token` is empty iff the page is short.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedList<T> {
    pub items: Vec<T>,
    pub next_page_token: String,
}

/// The runs query for one request, ready to render for its dialect.
#[derive(Debug, Clone)]
pub struct CompiledSearch {
    pub dialect: Dialect,
    pub select: SelectStatement,
    pub limit: u64,
    pub offset: u64,
}

impl CompiledSearch {
    pub fn to_sql(&self) -> (String, Values) {
        self.dialect.build_paged(&self.select, self.limit, self.offset)
    }
}

/// Builds the paged runs query for `request`.
pub fn compile_search(
    request: &SearchRunsRequest,
    dialect: Dialect,
    default_max_results: i32,
) -> Result<CompiledSearch> {
    request.validate()?;
    let experiment_ids = request.parsed_experiment_ids()?;
    let limit = resolve_max_results(request.max_results.unwrap_or(default_max_results))?;
    let offset = page_token::decode(&request.page_token)?;

    let clauses = parse_filter(&request.filter)?;
    let order_by = parse_order_by(&request.order_by)?;
    let stages = request.run_view_type.unwrap_or_default().lifecycle_stages();

    let mut select = Query::select();
    select
        .columns(Runs::ROW_COLUMNS.iter().map(|column| (Runs::Table, *column)))
        .from(Runs::Table)
        .and_where(Expr::col((Runs::Table, Runs::ExperimentId)).is_in(experiment_ids))
        .and_where(
            Expr::col((Runs::Table, Runs::LifecycleStage))
                .is_in(stages.iter().map(|stage| stage.as_str())),
        );

    FilterCompiler::new(dialect).apply(&mut select, &clauses)?;
    OrderByCompiler::new(dialect).apply(&mut select, &order_by)?;

    Ok(CompiledSearch {
        dialect,
        select,
        limit,
        offset,
    })
}

/// Executes compiled searches. Implementations run the main query and the
/// satellite preloads in one transaction and return rows in query order.
pub trait RunStore: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn fetch_runs(&self, ctx: &SearchContext, query: &CompiledSearch) -> Result<Vec<RunRow>>;
}

pub struct SearchDriver<S> {
    store: S,
    default_max_results: i32,
}

impl<S: RunStore> SearchDriver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            default_max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_default_max_results(mut self, default_max_results: i32) -> Self {
        self.default_max_results = default_max_results;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn search(
        &self,
        ctx: &SearchContext,
        request: &SearchRunsRequest,
    ) -> Result<PagedList<Run>> {
        ctx.check()?;
        let query = compile_search(request, self.store.dialect(), self.default_max_results)?;

        let (sql, values) = query.to_sql();
        debug!(sql = %sql, binds = values.0.len(), "executing search runs query");

        let rows = self.store.fetch_runs(ctx, &query).inspect_err(|err| {
            warn!(error = %err, "search runs query failed");
        })?;
        // A cancellation that lands after the last statement still discards
        // the page.
        ctx.check()?;

        let next_page_token = if rows.len() as u64 == query.limit {
            page_token::encode(query.offset + query.limit)?
        } else {
            String::new()
        };

        Ok(PagedList {
            items: rows.into_iter().map(materialize).collect(),
            next_page_token,
        })
    }

    pub fn search_runs(
        &self,
        ctx: &SearchContext,
        request: &SearchRunsRequest,
    ) -> Result<SearchRunsResponse> {
        let page = self.search(ctx, request)?;
        Ok(SearchRunsResponse {
            runs: page.items,
            next_page_token: page.next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Returns canned rows and records the SQL it was asked to run.
    struct CannedStore {
        dialect: Dialect,
        rows: Vec<RunRow>,
        seen: Mutex<Vec<String>>,
    }

    impl CannedStore {
        fn new(dialect: Dialect, count: usize) -> Self {
            let rows = (0..count)
                .map(|i| RunRow {
                    run_uuid: format!("run{:02}", i),
                    experiment_id: 1,
                    ..Default::default()
                })
                .collect();
            Self {
                dialect,
                rows,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl RunStore for CannedStore {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        fn fetch_runs(&self, _ctx: &SearchContext, query: &CompiledSearch) -> Result<Vec<RunRow>> {
            self.seen.lock().push(query.to_sql().0);
            let offset = query.offset as usize;
            let limit = query.limit as usize;
            Ok(self.rows.iter().skip(offset).take(limit).cloned().collect())
        }
    }

    struct FailingStore;

    impl RunStore for FailingStore {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        fn fetch_runs(&self, _ctx: &SearchContext, _query: &CompiledSearch) -> Result<Vec<RunRow>> {
            Err(SearchError::internal("Failed to query search runs", "no such table: runs"))
        }
    }

    fn request(filter: &str, max_results: i32) -> SearchRunsRequest {
        SearchRunsRequest {
            experiment_ids: vec!["1".into()],
            filter: filter.into(),
            max_results: Some(max_results),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_page_gets_token() {
        let driver = SearchDriver::new(CannedStore::new(Dialect::Sqlite, 5));
        let page = driver.search(&SearchContext::new(), &request("", 2)).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page_token::decode(&page.next_page_token).unwrap(), 2);
    }

    #[test]
    fn test_pages_concatenate_to_whole_result() {
        let driver = SearchDriver::new(CannedStore::new(Dialect::Sqlite, 5));
        let ctx = SearchContext::new();
        let mut req = request("", 2);
        let mut seen = Vec::new();
        loop {
            let page = driver.search(&ctx, &req).unwrap();
            seen.extend(page.items.into_iter().map(|r| r.info.run_uuid));
            if page.next_page_token.is_empty() {
                break;
            }
            req.page_token = page.next_page_token;
        }
        assert_eq!(seen, vec!["run00", "run01", "run02", "run03", "run04"]);
    }

    #[test]
    fn test_short_page_has_no_token() {
        let driver = SearchDriver::new(CannedStore::new(Dialect::Sqlite, 3));
        let page = driver.search(&SearchContext::new(), &request("", 10)).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.next_page_token.is_empty());
    }

    #[test]
    fn test_query_shape() {
        let driver = SearchDriver::new(CannedStore::new(Dialect::Postgres, 0));
        let mut req = request("metrics.acc > 0.5", 10);
        req.run_view_type = Some(ViewType::ActiveOnly);
        req.order_by = vec!["params.lr DESC".into()];
        driver.search(&SearchContext::new(), &req).unwrap();

        let sql = driver.store().seen.lock()[0].clone();
        assert!(sql.starts_with(r#"SELECT "runs"."run_uuid", "runs"."name""#), "{}", sql);
        assert!(sql.contains(r#""runs"."experiment_id" IN ($"#));
        assert!(sql.contains(r#""runs"."lifecycle_stage" IN ($"#));
        assert_eq!(sql.matches(" JOIN ").count(), 2);
        assert!(sql.ends_with(r#""runs"."run_uuid" ASC LIMIT $6 OFFSET $7"#), "{}", sql);
    }

    #[test]
    fn test_default_max_results() {
        let driver =
            SearchDriver::new(CannedStore::new(Dialect::Sqlite, 4)).with_default_max_results(3);
        let mut req = request("", 1);
        req.max_results = None;
        let page = driver.search(&SearchContext::new(), &req).unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(!page.next_page_token.is_empty());
    }

    #[test]
    fn test_configured_default_is_range_checked() {
        for default_max_results in [0, -5, MAX_RESULTS_LIMIT + 1] {
            let driver = SearchDriver::new(CannedStore::new(Dialect::Sqlite, 3))
                .with_default_max_results(default_max_results);
            let mut req = request("", 1);
            req.max_results = None;
            let err = driver.search(&SearchContext::new(), &req).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_PARAMETER_VALUE");
            assert!(driver.store().seen.lock().is_empty());
        }

        let compiled = compile_search(
            &SearchRunsRequest {
                experiment_ids: vec!["1".into()],
                ..Default::default()
            },
            Dialect::Sqlite,
            MAX_RESULTS_LIMIT,
        )
        .unwrap();
        assert_eq!(compiled.limit, MAX_RESULTS_LIMIT as u64);
    }

    #[test]
    fn test_request_validation() {
        for bad in [0, -1, 50_001] {
            let err = request("", bad).validate().unwrap_err();
            assert_eq!(err.error_code(), "INVALID_PARAMETER_VALUE");
        }
        assert!(request("", 50_000).validate().is_ok());

        let mut req = request("", 10);
        req.experiment_ids = vec!["abc".into()];
        assert_eq!(
            req.validate().unwrap_err().error_code(),
            "INVALID_PARAMETER_VALUE"
        );
    }

    #[test]
    fn test_errors_propagate_by_kind() {
        let driver = SearchDriver::new(CannedStore::new(Dialect::Sqlite, 1));
        let ctx = SearchContext::new();

        let err = driver.search(&ctx, &request("metrics.a >", 1)).unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");

        let mut req = request("", 1);
        req.order_by = vec!["bogus.key".into()];
        assert_eq!(driver.search(&ctx, &req).unwrap_err().error_code(), "BAD_REQUEST");

        let mut req = request("", 1);
        req.page_token = "%%%".into();
        assert_eq!(driver.search(&ctx, &req).unwrap_err().error_code(), "BAD_REQUEST");

        let err = SearchDriver::new(FailingStore)
            .search(&ctx, &request("", 1))
            .unwrap_err();
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn test_cancelled_request_never_reaches_store() {
        let driver = SearchDriver::new(CannedStore::new(Dialect::Sqlite, 1));
        let ctx = SearchContext::new();
        ctx.cancellation().cancel();
        let err = driver.search(&ctx, &request("", 1)).unwrap_err();
        assert_eq!(err.error_code(), "CANCELLED");
        assert!(driver.store().seen.lock().is_empty());

        let expired = SearchContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(
            driver.search(&expired, &request("", 1)).unwrap_err().error_code(),
            "CANCELLED"
        );
    }

    #[test]
    fn test_request_json_defaults() {
        let req: SearchRunsRequest =
            serde_json::from_str(r#"{"experiment_ids": ["0"], "run_view_type": "ACTIVE_ONLY"}"#)
                .unwrap();
        assert_eq!(req.filter, "");
        assert_eq!(req.max_results, None);
        assert_eq!(req.run_view_type, Some(ViewType::ActiveOnly));
    }
}
