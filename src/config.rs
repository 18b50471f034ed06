use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration, loadable from a JSON file. Anything omitted takes
/// its default; `server` and `session_key` must end up non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub session_key: String,
    /// `host:port` of the push notifier; without it the client only polls.
    #[serde(default)]
    pub notifier: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Persist the state every this many orchestrator loop iterations.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: u64,
    #[serde(default = "default_idle_tick")]
    pub fanin_idle_tick_ms: u64,
    /// Capacity of the bounded queue of events waiting for the orchestrator.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reconnect")]
    pub reconnect_ms: u64,
    #[serde(default)]
    pub include_hidden: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval() -> u64 {
    30_000
}

fn default_checkpoint_every() -> u64 {
    16
}

fn default_idle_tick() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_concurrent_tasks() -> usize {
    8
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_reconnect() -> u64 {
    5_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            server: String::new(),
            session_key: String::new(),
            notifier: None,
            poll_interval_ms: default_poll_interval(),
            checkpoint_every: default_checkpoint_every(),
            fanin_idle_tick_ms: default_idle_tick(),
            queue_capacity: default_queue_capacity(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            request_timeout_ms: default_request_timeout(),
            reconnect_ms: default_reconnect(),
            include_hidden: false,
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.server.trim().is_empty() {
            return Err(SyncError::Config("server URL is required".into()));
        }
        if self.session_key.trim().is_empty() {
            return Err(SyncError::Config("session key is required".into()));
        }
        if self.checkpoint_every == 0 {
            return Err(SyncError::Config("checkpoint_every must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("poll_interval_ms must be at least 1".into()));
        }
        if self.fanin_idle_tick_ms == 0 {
            return Err(SyncError::Config("fanin_idle_tick_ms must be at least 1".into()));
        }
        if self.queue_capacity == 0 || self.max_concurrent_tasks == 0 {
            return Err(SyncError::Config(
                "queue_capacity and max_concurrent_tasks must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fanin_idle_tick(&self) -> Duration {
        Duration::from_millis(self.fanin_idle_tick_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}
