use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by a `DocumentStore` backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("cannot open card store at {path:?}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("script directory not found: {0:?}")]
    SourceUnavailable(PathBuf),

    #[error("git {action} failed: {reason}")]
    Git { action: &'static str, reason: String },

    #[error("cannot read {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no card id in file name {0:?}")]
    FilenamePattern(String),

    #[error("store lookup for {id} failed: {source}")]
    StoreRead {
        id: i64,
        #[source]
        source: StoreError,
    },

    #[error("store upsert for {id} failed: {source}")]
    StoreWrite {
        id: i64,
        #[source]
        source: StoreError,
    },

    #[error("card info lookup for {id} failed: {reason}")]
    Upstream { id: i64, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl SyncError {
    /// Recovered per-file conditions that count as a skip rather than an error.
    pub fn is_skip(&self) -> bool {
        matches!(self, SyncError::FilenamePattern(_))
    }
}
