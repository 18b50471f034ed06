#![allow(dead_code)]

use async_trait::async_trait;
use boxsync::error::SyncError;
use boxsync::events::ChangeSink;
use boxsync::hash::digest_bytes;
use boxsync::model::{ChangeEvent, FileAction, PullResponse};
use boxsync::transport::RemoteTransport;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Holds the first `send_file_actions` call until a second one arrives.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

/// In-memory stand-in for the server and its blob store.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<FileAction>>,
    pub uploads: Mutex<Vec<Vec<u8>>>,
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub pulls: Mutex<VecDeque<PullResponse>>,
    pub pulled_from: Mutex<Vec<i64>>,
    pub fail_sends: AtomicBool,
    pub fail_pulls: AtomicBool,
    calls: AtomicUsize,
    gate: Option<Gate>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Gate::default()),
            ..Self::default()
        }
    }

    /// Wait until the first send has entered the gate.
    pub async fn first_send_entered(&self) {
        if let Some(gate) = &self.gate {
            gate.entered.notified().await;
        }
    }

    pub fn store_blob(&self, body: &[u8]) -> String {
        let hash = digest_bytes(body);
        self.blobs.lock().unwrap().insert(hash.clone(), body.to_vec());
        hash
    }

    pub fn queue_pull(&self, response: PullResponse) {
        self.pulls.lock().unwrap().push_back(response);
    }

    pub fn sent(&self) -> Vec<FileAction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn send_file_actions(&self, actions: &[FileAction]) -> Result<Vec<String>, SyncError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SyncError::Network("connection refused".into()));
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().extend_from_slice(actions);

        if let Some(gate) = &self.gate {
            if call == 0 {
                gate.entered.notify_one();
                gate.release.notified().await;
            } else {
                gate.release.notify_one();
            }
        }

        let blobs = self.blobs.lock().unwrap();
        Ok(actions
            .iter()
            .filter(|a| a.is_create && !blobs.contains_key(&a.file.content_hash))
            .map(|a| a.file.content_hash.clone())
            .collect())
    }

    async fn upload(&self, body: Vec<u8>) -> Result<(), SyncError> {
        self.store_blob(&body);
        self.uploads.lock().unwrap().push(body);
        Ok(())
    }

    async fn download_url(&self, hash: &str) -> Result<Option<String>, SyncError> {
        let blobs = self.blobs.lock().unwrap();
        Ok(blobs.contains_key(hash).then(|| format!("mock://{}", hash)))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let hash = url.trim_start_matches("mock://");
        self.blobs
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| SyncError::Protocol(format!("no blob {}", hash)))
    }

    async fn pull_actions(&self, last_id: i64) -> Result<PullResponse, SyncError> {
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(SyncError::Network("timed out".into()));
        }
        self.pulled_from.lock().unwrap().push(last_id);
        Ok(self
            .pulls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PullResponse {
                last_id,
                file_actions: Vec::new(),
            }))
    }
}

/// Sink that records what it is given.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ChangeEvent>>,
    pub cursors: Mutex<Vec<i64>>,
}

impl RecordingSink {
    pub fn paths(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.path().to_string())
            .collect()
    }
}

#[async_trait]
impl ChangeSink for RecordingSink {
    async fn submit(&self, event: ChangeEvent) -> Result<(), SyncError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn advance_cursor(&self, last_action_id: i64) -> Result<(), SyncError> {
        self.cursors.lock().unwrap().push(last_action_id);
        Ok(())
    }
}
