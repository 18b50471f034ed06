//! Error types shared by every component of the sync client.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while synchronizing a tree with the server.
///
/// Per-path failures (`Io`, `Network`, `Protocol`) are reported on a task's
/// error signal and never stop the client. `Directory`, `Watch`, `Locked` and
/// `Config` are only returned at startup.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not a directory: {0}")]
    Directory(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("metadata directory is locked by another client: {0}")]
    Locked(PathBuf),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("client is shutting down")]
    Shutdown,
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the failure means the path no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Protocol(format!("malformed response: {}", e))
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

/// Payload of a task's error signal.
#[derive(Debug)]
pub struct ErrorMessage {
    pub task_id: u64,
    pub path: String,
    /// Which step of the task chain failed, e.g. "hash" or "upload".
    pub stage: &'static str,
    pub error: SyncError,
}
