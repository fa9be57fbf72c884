use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DvrError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dvr job {job_id} not found")]
    JobNotFound { job_id: i64 },
    #[error("recording {recording_id} not found")]
    RecordingNotFound { recording_id: i64 },
    #[error("invalid recording window: stop {end} is not after start {start}")]
    InvalidWindow { start: String, end: String },
    #[error("unknown job status: {0}")]
    InvalidStatus(String),
    #[error("dvr store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub type DvrResult<T> = std::result::Result<T, DvrError>;
