//! Client side of the server protocol.
//!
//! The orchestrator and the poller only see [`RemoteTransport`]; the HTTP
//! implementation lives in [`http`] and the push channel in [`push`].

pub mod http;
pub mod push;

pub use http::HttpTransport;

use crate::error::SyncError;
use crate::model::{FileAction, PullResponse};
use async_trait::async_trait;

#[async_trait]
pub trait RemoteTransport: Send + Sync + 'static {
    /// Report actions to the server. Returns the content hashes the server
    /// does not hold yet and wants uploaded.
    async fn send_file_actions(&self, actions: &[FileAction]) -> Result<Vec<String>, SyncError>;

    /// Upload a body; the server keys it by its own digest of the bytes.
    async fn upload(&self, body: Vec<u8>) -> Result<(), SyncError>;

    /// Signed URL for a stored body, `None` when the blob store lacks it.
    async fn download_url(&self, hash: &str) -> Result<Option<String>, SyncError>;

    /// Fetch the body behind a signed URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError>;

    /// Every action other clients logged after `last_id`.
    async fn pull_actions(&self, last_id: i64) -> Result<PullResponse, SyncError>;
}

#[async_trait]
impl<T: RemoteTransport> RemoteTransport for std::sync::Arc<T> {
    async fn send_file_actions(&self, actions: &[FileAction]) -> Result<Vec<String>, SyncError> {
        (**self).send_file_actions(actions).await
    }

    async fn upload(&self, body: Vec<u8>) -> Result<(), SyncError> {
        (**self).upload(body).await
    }

    async fn download_url(&self, hash: &str) -> Result<Option<String>, SyncError> {
        (**self).download_url(hash).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        (**self).fetch(url).await
    }

    async fn pull_actions(&self, last_id: i64) -> Result<PullResponse, SyncError> {
        (**self).pull_actions(last_id).await
    }
}
