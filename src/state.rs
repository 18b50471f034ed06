//! Persistent mirror of the synced tree.
//!
//! The state lives inside the synced root, under a metadata directory that
//! the watcher never reports:
//!
//! ```text
//! <root>/.boxsync/
//!     state.json    last seen action id + path -> FileRecord
//!     status.json   snapshot of the running client
//!     lock          exclusive lock held while a client runs
//!     tmp/          staging area for downloads
//! ```

use crate::error::SyncError;
use crate::model::{FileAction, FileRecord};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the metadata directory under the synced root.
pub const METADATA_DIR: &str = ".boxsync";

/// Extension used for every in-progress file the client writes.
pub const TEMP_EXTENSION: &str = "tmp";

const STATE_FILE: &str = "state.json";
const STATUS_FILE: &str = "status.json";
const LOCK_FILE: &str = "lock";
const STAGING_DIR: &str = "tmp";

/// What the client believes the synced tree looks like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileSystemState {
    /// Highest server action id already applied.
    pub last_action_id: i64,
    /// Relative path to the last synced record of that path.
    pub state: BTreeMap<String, FileRecord>,
}

impl FileSystemState {
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.state.get(path)
    }

    /// Digest last synced for a path, empty when untracked.
    pub fn hash_of(&self, path: &str) -> String {
        self.state
            .get(path)
            .map(|r| r.content_hash.clone())
            .unwrap_or_default()
    }

    pub fn upsert(&mut self, record: FileRecord) {
        self.state.insert(record.path.clone(), record);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.state.remove(path)
    }

    /// Record the outcome of a completed action.
    pub fn apply(&mut self, action: &FileAction) {
        if action.is_create {
            self.upsert(action.file.clone());
        } else {
            self.remove(action.path());
        }
    }

    /// Move the cursor forward; it never goes back.
    pub fn advance_cursor(&mut self, last_action_id: i64) -> bool {
        if last_action_id > self.last_action_id {
            self.last_action_id = last_action_id;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

/// Paths and persistence for `<root>/.boxsync`.
#[derive(Debug, Clone)]
pub struct MetadataDir {
    dir: PathBuf,
}

/// Held for as long as the client runs; dropping it releases the lock.
#[derive(Debug)]
pub struct MetadataLock {
    _file: File,
}

impl MetadataDir {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(METADATA_DIR),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.join(STAGING_DIR)
    }

    /// Create the directory and its staging area.
    pub async fn ensure(&self) -> Result<(), SyncError> {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| SyncError::io(&staging, e))
    }

    /// Take the exclusive lock that keeps two clients off one root.
    pub fn lock(&self) -> Result<MetadataLock, SyncError> {
        let path = self.dir.join(LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| SyncError::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| SyncError::Locked(self.dir.clone()))?;
        debug!("acquired lock on {}", path.display());
        Ok(MetadataLock { _file: file })
    }

    /// Load the persisted state. A missing file yields an empty state that is
    /// written out right away, so a fresh root is initialized on first start.
    pub async fn load_state(&self) -> Result<FileSystemState, SyncError> {
        let path = self.state_path();
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no state at {}, starting fresh", path.display());
                let state = FileSystemState::default();
                self.save_state(&state).await?;
                Ok(state)
            }
            Err(e) => Err(SyncError::io(&path, e)),
        }
    }

    /// Write the state through a temporary file and rename it into place.
    pub async fn save_state(&self, state: &FileSystemState) -> Result<(), SyncError> {
        let content = serde_json::to_string_pretty(state)?;
        self.write_atomic(&self.state_path(), content.as_bytes())
            .await
    }

    pub(crate) async fn write_atomic(
        &self,
        target: &Path,
        content: &[u8],
    ) -> Result<(), SyncError> {
        let tmp = self
            .dir
            .join(format!("{}.{}", uuid::Uuid::new_v4(), TEMP_EXTENSION));
        fs::write(&tmp, content)
            .await
            .map_err(|e| SyncError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(SyncError::io(target, e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord::at_path(path).with_hash(hash)
    }

    #[tokio::test]
    async fn test_load_missing_state_writes_empty() {
        let dir = tempdir().unwrap();
        let meta = MetadataDir::new(dir.path());
        meta.ensure().await.unwrap();

        let state = meta.load_state().await.unwrap();
        assert!(state.is_empty());
        assert_eq!(state.last_action_id, 0);
        assert!(meta.state_path().exists());
    }

    #[tokio::test]
    async fn test_save_and_load_state() {
        let dir = tempdir().unwrap();
        let meta = MetadataDir::new(dir.path());
        meta.ensure().await.unwrap();

        let mut state = FileSystemState::default();
        state.upsert(record("a.txt", "h1"));
        state.upsert(record("dir/b.txt", "h2"));
        state.advance_cursor(17);
        meta.save_state(&state).await.unwrap();

        let loaded = meta.load_state().await.unwrap();
        assert_eq!(loaded, state);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(meta.state_path()).unwrap()).unwrap();
        assert_eq!(raw["lastActionId"], 17);
        assert_eq!(raw["state"]["dir/b.txt"]["contentHash"], "h2");
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let meta = MetadataDir::new(dir.path());
        meta.ensure().await.unwrap();
        meta.save_state(&FileSystemState::default()).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(meta.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == TEMP_EXTENSION))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let dir = tempdir().unwrap();
        let meta = MetadataDir::new(dir.path());
        meta.ensure().await.unwrap();
        std::fs::write(meta.state_path(), "{not json").unwrap();

        assert!(matches!(
            meta.load_state().await,
            Err(SyncError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let meta = MetadataDir::new(dir.path());
        meta.ensure().await.unwrap();

        let guard = meta.lock().unwrap();
        assert!(matches!(meta.lock(), Err(SyncError::Locked(_))));
        drop(guard);
        assert!(meta.lock().is_ok());
    }

    #[test]
    fn test_apply_and_cursor() {
        let mut state = FileSystemState::default();
        state.apply(&FileAction {
            is_create: true,
            file: record("a.txt", "h1"),
            ..FileAction::default()
        });
        assert_eq!(state.hash_of("a.txt"), "h1");

        state.apply(&FileAction {
            is_create: false,
            file: record("a.txt", "h1"),
            ..FileAction::default()
        });
        assert!(state.get("a.txt").is_none());
        assert_eq!(state.hash_of("a.txt"), "");

        assert!(state.advance_cursor(5));
        assert!(!state.advance_cursor(3));
        assert_eq!(state.last_action_id, 5);
    }
}
