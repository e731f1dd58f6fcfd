//! Failure taxonomy for a load run.
//!
//! Only [`LoadError::ConnectionFailure`], [`LoadError::InvalidFamily`] and a
//! [`LoadError::SourceNotFound`] on a required stage ever escape the
//! orchestrator. Everything else is downgraded into a
//! [`StageOutcome`](crate::pipeline::StageOutcome) record.

use std::path::PathBuf;

use thiserror::Error;

use crate::resolve::SourceIndex;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("source {path:?} not found")]
    SourceNotFound { path: PathBuf },

    #[error("source {path:?} is unreadable: {message}")]
    SourceUnreadable { path: PathBuf, message: String },

    #[error("duplicate value {index} in index column '{column}'")]
    DuplicateIndex { column: String, index: SourceIndex },

    #[error("database connection failed: {0}")]
    ConnectionFailure(String),

    #[error("row {row} insert failed: {message}")]
    RowInsertFailure { row: usize, message: String },

    #[error("batch rows {start}..{end} insert failed: {message}")]
    BatchInsertFailure {
        start: usize,
        end: usize,
        message: String,
    },

    #[error("stage '{stage}' consumes map '{map}' which no earlier stage registered")]
    UnresolvedDependency { stage: String, map: String },

    #[error("invalid family '{family}': {message}")]
    InvalidFamily { family: String, message: String },
}

impl LoadError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        LoadError::SourceUnreadable {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
