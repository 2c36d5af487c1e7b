//! Run search for an MLflow-compatible tracking store.
//!
//! A search request's filter string is lexed, parsed and validated into typed
//! comparisons, compiled together with its `order_by` clauses into one SQL
//! statement for the store's dialect, executed with its satellite preloads,
//! and materialized into `Run` values with a page token for the next page.

pub mod ast;
pub mod config;
pub mod dialect;
pub mod error;
pub mod lexer;
pub mod materialize;
pub mod model;
pub mod order_by;
pub mod page_token;
pub mod parser;
pub mod schema;
pub mod search;
pub mod sql_compiler;
pub mod store;
pub mod token;
pub mod validate;

pub use config::{ConfigError, SearchConfig};
pub use dialect::Dialect;
pub use error::{ErrorEnvelope, Result, SearchError};
pub use materialize::Run;
pub use search::{
    compile_search, CancellationHandle, CompiledSearch, PagedList, RunStore, SearchContext,
    SearchDriver, SearchRunsRequest, SearchRunsResponse,
};
pub use store::SqliteRunStore;
pub use validate::parse_filter;
