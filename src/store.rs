//! SQLite-backed [`RunStore`].
//!
//! Connections are pooled; a search holds one connection for the main query
//! and all satellite preloads, which run inside a single transaction. The
//! request's cancellation handle and deadline are polled by SQLite's progress
//! handler, so a long statement is interrupted rather than awaited.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OpenFlags, Transaction};
use sea_query::{Expr, JoinType, Order, Query, SelectStatement, SqliteQueryBuilder};
use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::error::{Result, SearchError};
use crate::model::{
    DatasetRow, InputRow, InputTagRow, LatestMetricRow, ParamRow, RunRow, TagRow,
};
use crate::schema::{Datasets, InputTags, Inputs, LatestMetrics, Params, Tags};
use crate::search::{CompiledSearch, RunStore, SearchContext};

const QUERY_FAILED: &str = "Failed to query search runs";

/// SQLite VM instructions between cancellation checks.
const PROGRESS_INTERVAL: i32 = 1000;

/// Run ids per preload statement; keeps binds under SQLite's variable limit.
const PRELOAD_CHUNK: usize = 500;

fn query_error(err: rusqlite::Error) -> SearchError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::OperationInterrupted =>
        {
            SearchError::Cancelled("search runs statement interrupted".to_string())
        }
        _ => SearchError::internal(QUERY_FAILED, err),
    }
}

struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
}

impl ConnectionPool {
    /// Checks out an idle connection for the duration of `f`, waiting for
    /// one if all are busy. The connection goes back to the pool even when
    /// `f` panics; the panic is resumed afterwards.
    fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> T {
        let mut conn = {
            let mut idle = self.idle.lock();
            loop {
                match idle.pop() {
                    Some(conn) => break conn,
                    None => self.available.wait(&mut idle),
                }
            }
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut conn)));
        if result.is_err() {
            // f may have unwound before clearing its handler.
            conn.progress_handler(0, None::<fn() -> bool>);
        }
        self.idle.lock().push(conn);
        self.available.notify_one();
        result.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }
}

#[derive(Clone)]
pub struct SqliteRunStore {
    path: PathBuf,
    pool: Arc<ConnectionPool>,
}

impl SqliteRunStore {
    /// Opens `pool_size` connections (at least one) to an existing tracking
    /// database.
    pub fn open<P: AsRef<Path>>(path: P, pool_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let mut connections = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let conn = Connection::open_with_flags(&path, flags).map_err(|e| {
                SearchError::internal(
                    format!("failed to open tracking store {}", path.display()),
                    e,
                )
            })?;
            conn.busy_timeout(Duration::from_secs(5))
                .map_err(|e| SearchError::internal("failed to configure tracking store", e))?;
            connections.push(conn);
        }
        info!(path = %path.display(), pool_size = connections.len(), "opened sqlite run store");

        Ok(Self {
            path,
            pool: Arc::new(ConnectionPool {
                idle: Mutex::new(connections),
                available: Condvar::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` with the request's cancellation installed as the
    /// connection's progress handler.
    fn interruptible<T>(
        &self,
        ctx: &SearchContext,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        ctx.check()?;
        let watched = ctx.clone();
        self.pool
            .with_connection(|conn| {
                conn.progress_handler(PROGRESS_INTERVAL, Some(move || watched.should_abort()));
                let result = f(conn);
                conn.progress_handler(0, None::<fn() -> bool>);
                result
            })
            .map_err(query_error)
    }
}

impl RunStore for SqliteRunStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn fetch_runs(&self, ctx: &SearchContext, query: &CompiledSearch) -> Result<Vec<RunRow>> {
        let (sql, values) = query.to_sql();
        let binds = values
            .0
            .into_iter()
            .map(to_sql_value)
            .collect::<Result<Vec<_>>>()?;

        self.interruptible(ctx, |conn| {
            let tx = conn.transaction()?;
            let mut runs = select_runs(&tx, &sql, &binds)?;
            preload(&tx, &mut runs)?;
            tx.commit()?;
            debug!(runs = runs.len(), "loaded search runs page");
            Ok(runs)
        })
    }
}

#[allow(unreachable_patterns)]
fn to_sql_value(value: sea_query::Value) -> Result<SqlValue> {
    use sea_query::Value as V;

    fn int<T: Into<i64>>(v: Option<T>) -> SqlValue {
        v.map_or(SqlValue::Null, |n| SqlValue::Integer(n.into()))
    }

    Ok(match value {
        V::Bool(v) => int(v.map(i64::from)),
        V::TinyInt(v) => int(v),
        V::SmallInt(v) => int(v),
        V::Int(v) => int(v),
        V::BigInt(v) => int(v),
        V::TinyUnsigned(v) => int(v),
        V::SmallUnsigned(v) => int(v),
        V::Unsigned(v) => int(v),
        V::BigUnsigned(v) => match v {
            Some(n) => SqlValue::Integer(
                i64::try_from(n).map_err(|e| SearchError::internal(QUERY_FAILED, e))?,
            ),
            None => SqlValue::Null,
        },
        V::Float(v) => v.map_or(SqlValue::Null, |f| SqlValue::Real(f64::from(f))),
        V::Double(v) => v.map_or(SqlValue::Null, SqlValue::Real),
        V::String(v) => v.map_or(SqlValue::Null, |s| SqlValue::Text(*s)),
        V::Char(v) => v.map_or(SqlValue::Null, |c| SqlValue::Text(c.to_string())),
        V::Bytes(v) => v.map_or(SqlValue::Null, |b| SqlValue::Blob(*b)),
        other => {
            return Err(SearchError::internal(
                QUERY_FAILED,
                format!("unsupported bind value {:?}", other),
            ))
        }
    })
}

fn select_runs(tx: &Transaction<'_>, sql: &str, binds: &[SqlValue]) -> rusqlite::Result<Vec<RunRow>> {
    debug!(sql, binds = binds.len(), "sqlite search runs");
    let mut stmt = tx.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), |row| {
        Ok(RunRow {
            run_uuid: row.get(0)?,
            name: row.get(1)?,
            source_type: row.get(2)?,
            experiment_id: row.get(3)?,
            user_id: row.get(4)?,
            status: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
            artifact_uri: row.get(8)?,
            lifecycle_stage: row.get(9)?,
            ..Default::default()
        })
    })?;
    rows.collect()
}

/// Runs a preload statement and hands every row to `each`.
fn for_each_row<F>(tx: &Transaction<'_>, select: &SelectStatement, mut each: F) -> rusqlite::Result<()>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<()>,
{
    let (sql, values) = select.build(SqliteQueryBuilder);
    let binds = values
        .0
        .into_iter()
        .map(|v| to_sql_value(v).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e))))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut stmt = tx.prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(binds.iter()))?;
    while let Some(row) = rows.next()? {
        each(row)?;
    }
    Ok(())
}

/// Loads metrics, params, tags and run inputs for `runs`, in key order.
fn preload(tx: &Transaction<'_>, runs: &mut [RunRow]) -> rusqlite::Result<()> {
    let positions: HashMap<String, usize> = runs
        .iter()
        .enumerate()
        .map(|(i, run)| (run.run_uuid.clone(), i))
        .collect();
    let run_ids: Vec<String> = runs.iter().map(|run| run.run_uuid.clone()).collect();

    for chunk in run_ids.chunks(PRELOAD_CHUNK) {
        let ids = chunk.iter().cloned();

        let metrics = Query::select()
            .columns([
                LatestMetrics::RunUuid,
                LatestMetrics::Key,
                LatestMetrics::Value,
                LatestMetrics::Timestamp,
                LatestMetrics::Step,
                LatestMetrics::IsNan,
            ])
            .from(LatestMetrics::Table)
            .and_where(Expr::col(LatestMetrics::RunUuid).is_in(ids.clone()))
            .order_by(LatestMetrics::RunUuid, Order::Asc)
            .order_by(LatestMetrics::Key, Order::Asc)
            .to_owned();
        for_each_row(tx, &metrics, |row| {
            if let Some(&i) = positions.get(&row.get::<_, String>(0)?) {
                runs[i].latest_metrics.push(LatestMetricRow {
                    key: row.get(1)?,
                    value: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    timestamp: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
                    step: row.get(4)?,
                    is_nan: row.get(5)?,
                });
            }
            Ok(())
        })?;

        let params = Query::select()
            .columns([Params::RunUuid, Params::Key, Params::Value])
            .from(Params::Table)
            .and_where(Expr::col(Params::RunUuid).is_in(ids.clone()))
            .order_by(Params::RunUuid, Order::Asc)
            .order_by(Params::Key, Order::Asc)
            .to_owned();
        for_each_row(tx, &params, |row| {
            if let Some(&i) = positions.get(&row.get::<_, String>(0)?) {
                runs[i].params.push(ParamRow {
                    key: row.get(1)?,
                    value: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                });
            }
            Ok(())
        })?;

        let tags = Query::select()
            .columns([Tags::RunUuid, Tags::Key, Tags::Value])
            .from(Tags::Table)
            .and_where(Expr::col(Tags::RunUuid).is_in(ids.clone()))
            .order_by(Tags::RunUuid, Order::Asc)
            .order_by(Tags::Key, Order::Asc)
            .to_owned();
        for_each_row(tx, &tags, |row| {
            if let Some(&i) = positions.get(&row.get::<_, String>(0)?) {
                runs[i].tags.push(TagRow {
                    key: row.get(1)?,
                    value: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                });
            }
            Ok(())
        })?;

        preload_inputs(tx, runs, &positions, ids)?;
    }
    Ok(())
}

fn preload_inputs(
    tx: &Transaction<'_>,
    runs: &mut [RunRow],
    positions: &HashMap<String, usize>,
    ids: impl Iterator<Item = String>,
) -> rusqlite::Result<()> {
    let inputs = Query::select()
        .column((Inputs::Table, Inputs::DestinationId))
        .column((Inputs::Table, Inputs::InputUuid))
        .columns([
            (Datasets::Table, Datasets::DatasetUuid),
            (Datasets::Table, Datasets::ExperimentId),
            (Datasets::Table, Datasets::Name),
            (Datasets::Table, Datasets::Digest),
            (Datasets::Table, Datasets::DatasetSourceType),
            (Datasets::Table, Datasets::DatasetSource),
            (Datasets::Table, Datasets::DatasetSchema),
            (Datasets::Table, Datasets::DatasetProfile),
        ])
        .from(Inputs::Table)
        .join(
            JoinType::Join,
            Datasets::Table,
            Expr::col((Datasets::Table, Datasets::DatasetUuid))
                .equals((Inputs::Table, Inputs::SourceId)),
        )
        .and_where(Expr::col((Inputs::Table, Inputs::DestinationType)).eq(Expr::cust("'RUN'")))
        .and_where(Expr::col((Inputs::Table, Inputs::DestinationId)).is_in(ids))
        .order_by((Inputs::Table, Inputs::DestinationId), Order::Asc)
        .order_by((Datasets::Table, Datasets::Name), Order::Asc)
        .to_owned();

    // input_uuid -> (run position, input position)
    let mut owners: HashMap<String, (usize, usize)> = HashMap::new();
    for_each_row(tx, &inputs, |row| {
        if let Some(&i) = positions.get(&row.get::<_, String>(0)?) {
            let input = InputRow {
                input_uuid: row.get(1)?,
                dataset: DatasetRow {
                    dataset_uuid: row.get(2)?,
                    experiment_id: row.get(3)?,
                    name: row.get(4)?,
                    digest: row.get(5)?,
                    source_type: row.get(6)?,
                    source: row.get(7)?,
                    schema: row.get(8)?,
                    profile: row.get(9)?,
                },
                tags: Vec::new(),
            };
            owners.insert(input.input_uuid.clone(), (i, runs[i].inputs.len()));
            runs[i].inputs.push(input);
        }
        Ok(())
    })?;

    if owners.is_empty() {
        return Ok(());
    }

    let input_ids: Vec<String> = owners.keys().cloned().collect();
    for chunk in input_ids.chunks(PRELOAD_CHUNK) {
        let tags = Query::select()
            .columns([InputTags::InputUuid, InputTags::Name, InputTags::Value])
            .from(InputTags::Table)
            .and_where(Expr::col(InputTags::InputUuid).is_in(chunk.iter().cloned()))
            .order_by(InputTags::InputUuid, Order::Asc)
            .order_by(InputTags::Name, Order::Asc)
            .to_owned();
        for_each_row(tx, &tags, |row| {
            if let Some(&(run, input)) = owners.get(&row.get::<_, String>(0)?) {
                runs[run].inputs[input].tags.push(InputTagRow {
                    name: row.get(1)?,
                    value: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                });
            }
            Ok(())
        })?;
    }
    Ok(())
}
