use thiserror::Error;

use crate::jobs::StoreError;

#[derive(Debug, Error)]
pub enum ColmeiaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Why a coordination run produced no usable result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("coordination failed: {cause}")]
    TotalFailure { cause: String },
}

/// Errors surfaced by the job API.
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed submission; no job was created.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} has not finished yet")]
    NotReady(String),

    #[error("job store error: {0}")]
    Store(#[from] StoreError),
}
