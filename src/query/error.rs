//! Query errors

use std::path::PathBuf;

use thiserror::Error;

use crate::core::DebugError;

/// Errors surfaced by the query operations
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("function and/or command only works if a program is running")]
    NotRunning,

    #[error("couldn't load helper library {}: {reason}", path.display())]
    HelperLoad { path: PathBuf, reason: String },

    #[error("invalid input")]
    InvalidInput,

    #[error("SQLite DB handle cannot be found")]
    HandleNotFound,

    #[error("couldn't call helper library: {0}")]
    CallFailed(#[source] DebugError),

    #[error("couldn't write result: {0}")]
    Output(#[from] std::io::Error),
}

impl QueryError {
    /// Recoverable conditions reported as warnings rather than errors
    pub fn is_warning(&self) -> bool {
        matches!(self, QueryError::NotRunning)
    }
}

impl From<DebugError> for QueryError {
    fn from(err: DebugError) -> Self {
        match err {
            DebugError::NotRunning => QueryError::NotRunning,
            other => QueryError::CallFailed(other),
        }
    }
}
