//! Search configuration, loaded from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dialect::Dialect;
use crate::search::DEFAULT_MAX_RESULTS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {0}")]
    Missing(PathBuf),

    #[error("cannot read config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Path of the SQLite tracking database.
    pub tracking_store_uri: String,
    /// Dialect the REPL renders filters for.
    pub dialect: Dialect,
    /// Used when `RUST_LOG` is unset.
    pub log_level: String,
    pub pool_size: usize,
    pub default_max_results: i32,
    /// Deadline applied to each search request.
    pub statement_timeout_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tracking_store_uri: "mlflow.db".to_string(),
            dialect: Dialect::Sqlite,
            log_level: "info".to_string(),
            pool_size: 4,
            default_max_results: DEFAULT_MAX_RESULTS,
            statement_timeout_ms: None,
        }
    }
}

impl SearchConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}
