//! Error taxonomy for run search.
//!
//! | Variant                 | Code                      | HTTP |
//! |-------------------------|---------------------------|------|
//! | `BadRequest`            | `BAD_REQUEST`             | 400  |
//! | `InvalidParameterValue` | `INVALID_PARAMETER_VALUE` | 400  |
//! | `ResourceDoesNotExist`  | `RESOURCE_DOES_NOT_EXIST` | 404  |
//! | `Internal`              | `INTERNAL_ERROR`          | 500  |
//! | `Cancelled`             | `CANCELLED`               | 499  |
//!
//! Nothing in the search path retries; an error is surfaced once and the
//! HTTP edge turns it into an [`ErrorEnvelope`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lexer::LexError;
use crate::parser::ParseError;

pub type Result<T> = std::result::Result<T, SearchError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Malformed grammar, unknown scope or key, unknown operator for a scope,
    /// bad page token, bad order-by clause.
    #[error("{0}")]
    BadRequest(String),

    /// The request is well formed but a value does not fit its field.
    #[error("{0}")]
    InvalidParameterValue(String),

    /// Raised by callers of the driver, e.g. for unknown experiment ids.
    #[error("{0}")]
    ResourceDoesNotExist(String),

    #[error("{message}: {source}")]
    Internal {
        message: String,
        #[source]
        source: BoxError,
    },

    /// The request was cancelled or its deadline elapsed.
    #[error("search request cancelled: {0}")]
    Cancelled(String),
}

impl SearchError {
    pub fn internal(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SearchError::Internal {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SearchError::BadRequest(_) => "BAD_REQUEST",
            SearchError::InvalidParameterValue(_) => "INVALID_PARAMETER_VALUE",
            SearchError::ResourceDoesNotExist(_) => "RESOURCE_DOES_NOT_EXIST",
            SearchError::Internal { .. } => "INTERNAL_ERROR",
            SearchError::Cancelled(_) => "CANCELLED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SearchError::BadRequest(_) | SearchError::InvalidParameterValue(_) => 400,
            SearchError::ResourceDoesNotExist(_) => 404,
            SearchError::Internal { .. } => 500,
            SearchError::Cancelled(_) => 499,
        }
    }
}

impl From<LexError> for SearchError {
    fn from(err: LexError) -> Self {
        SearchError::BadRequest(format!("error while lexing filter: {}", err))
    }
}

impl From<ParseError> for SearchError {
    fn from(err: ParseError) -> Self {
        SearchError::BadRequest(format!("error while parsing filter: {}", err))
    }
}

/// The `{error_code, message}` body returned at the HTTP edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error_code: String,
    pub message: String,
}

impl From<&SearchError> for ErrorEnvelope {
    fn from(err: &SearchError) -> Self {
        Self {
            error_code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
