/// Error types shared across the capture queue and the sync engine
///
/// Storage errors propagate to callers of the write path (a failed capture
/// must be reported). Remote errors never leave a sync pass: they are logged
/// per record and the record stays pending.

use thiserror::Error;

use crate::state::record::RecordId;

/// Failures of the local durable store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store failed to initialize and runs in degraded mode
    #[error("offline storage is unavailable")]
    Unavailable,
    #[error("capture {0} not found")]
    NotFound(RecordId),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode capture metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to prepare storage directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database connection lock was poisoned")]
    Poisoned,
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures of a remote collaborator during a sync pass
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("container {0} could not be provisioned: {1}")]
    ContainerUnavailable(String, String),
    #[error("upload of {path} failed: {reason}")]
    Upload { path: String, reason: String },
    #[error("object {0} has no public url")]
    UrlUnresolved(String),
    #[error("insert into {table} failed: {reason}")]
    Insert { table: String, reason: String },
    #[error("object is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
