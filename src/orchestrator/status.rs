//! Status file for a running client.
//!
//! Written into the metadata directory on every checkpoint and read back by
//! `boxsync-status`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// One in-flight task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingStatus {
    pub path: String,
    pub task_id: u64,
    /// upload, download, local-delete or remote-delete
    pub kind: String,
    /// How long the task has been running, in milliseconds
    pub running_ms: u64,
}

/// Snapshot of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Client PID
    pub pid: u32,
    /// When the client started (Unix timestamp)
    pub started_at: u64,
    /// Last server action id applied
    pub last_action_id: i64,
    /// Number of paths in the persisted state
    pub tracked_files: usize,
    /// Tasks that finished and were applied
    pub completed: u64,
    /// Tasks that reported an error
    pub failed: u64,
    /// Tasks cancelled by a newer event for the same path
    pub preempted: u64,
    /// Remote deletes refused because the local file had changed
    pub vetoed: u64,
    pub pending: Vec<PendingStatus>,
}

impl SyncStatus {
    pub fn new() -> Self {
        let started_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            pid: std::process::id(),
            started_at,
            ..Self::default()
        }
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Remove the status file; a missing file is fine.
    pub fn remove(path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_status_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut status = SyncStatus::new();
        status.preempted = 3;
        status.pending.push(PendingStatus {
            path: "a.txt".into(),
            task_id: 9,
            kind: "upload".into(),
            running_ms: 12,
        });
        fs::write(&path, serde_json::to_string_pretty(&status).unwrap()).unwrap();

        let read = SyncStatus::read(&path).unwrap();
        assert_eq!(read.pid, std::process::id());
        assert_eq!(read.preempted, 3);
        assert_eq!(read.pending[0].kind, "upload");

        SyncStatus::remove(&path).unwrap();
        assert!(!path.exists());
        SyncStatus::remove(&path).unwrap();
    }
}
