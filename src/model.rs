//! Wire and persisted records exchanged with the server.
//!
//! Every record tolerates missing fields: absent values deserialize to their
//! zero value (empty strings, `0`, the Unix epoch), which is how the server
//! represents "unknown".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file as the server knows it.
///
/// `path` is relative to the synced root and always `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileRecord {
    pub name: String,
    pub content_hash: String,
    pub size: i64,
    pub path: String,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Default for FileRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            content_hash: String::new(),
            size: 0,
            path: String::new(),
            modified_at: DateTime::<Utc>::UNIX_EPOCH,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl FileRecord {
    /// Record carrying only the path and its final component.
    pub fn at_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            path,
            ..Self::default()
        }
    }

    /// Record for a file that exists on disk; the hash is filled in later.
    pub fn from_metadata(path: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        let modified_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let created_at = meta
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified_at);

        Self {
            size: meta.len() as i64,
            modified_at,
            created_at,
            ..Self::at_path(path)
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }
}

/// One create or delete of one path, as logged by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileAction {
    pub id: i64,
    pub client_id: i64,
    pub is_create: bool,
    pub created_at: DateTime<Utc>,
    /// Digest the path held immediately before this action; empty when unknown.
    pub previous_hash: String,
    pub file: FileRecord,
    pub file_id: i64,
}

impl Default for FileAction {
    fn default() -> Self {
        Self {
            id: 0,
            client_id: 0,
            is_create: false,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            previous_hash: String::new(),
            file: FileRecord::default(),
            file_id: 0,
        }
    }
}

impl FileAction {
    pub fn path(&self) -> &str {
        &self.file.path
    }
}

/// Response of a pull: every action past the client's cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PullResponse {
    pub last_id: i64,
    pub file_actions: Vec<FileAction>,
}

/// A single observed change, local or remote, awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub file: FileRecord,
    /// True for create or modify, false for delete.
    pub is_create: bool,
    /// True when the change originated on this machine.
    pub is_local: bool,
    pub previous_hash: String,
}

impl ChangeEvent {
    pub fn local_create(file: FileRecord) -> Self {
        Self {
            file,
            is_create: true,
            is_local: true,
            previous_hash: String::new(),
        }
    }

    pub fn local_delete(file: FileRecord) -> Self {
        Self {
            file,
            is_create: false,
            is_local: true,
            previous_hash: String::new(),
        }
    }

    pub fn remote(action: FileAction) -> Self {
        Self {
            file: action.file,
            is_create: action.is_create,
            is_local: false,
            previous_hash: action.previous_hash,
        }
    }

    pub fn with_previous_hash(mut self, hash: impl Into<String>) -> Self {
        self.previous_hash = hash.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.file.path
    }

    /// The action this event would be reported to the server as.
    pub fn to_action(&self) -> FileAction {
        FileAction {
            is_create: self.is_create,
            created_at: Utc::now(),
            previous_hash: self.previous_hash.clone(),
            file: self.file.clone(),
            ..FileAction::default()
        }
    }
}
