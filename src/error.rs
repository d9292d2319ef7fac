//! Error type shared by the conversion, load and sync layers.

use thiserror::Error;

/// Failures raised by the conversion, translation and reconciliation layers.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid date '{0}'")]
    InvalidDate(String),

    #[error("invalid unit '{0}'")]
    InvalidUnit(String),

    #[error("invalid dependency type '{0}'")]
    InvalidDependencyType(String),

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("invalid value '{value}' for backend field '{field}'")]
    InvalidField { field: &'static str, value: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("backend request failed: {0}")]
    BackendRequestFailed(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        Self::BackendRequestFailed(e.to_string())
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
