use super::RemoteTransport;
use crate::error::SyncError;
use crate::model::{FileAction, PullResponse};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// [`RemoteTransport`] over the server's HTTP API.
///
/// Every request carries the session key; the server resolves it to the
/// user and client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    server: String,
    session_key: String,
}

impl HttpTransport {
    pub fn new(
        server: impl Into<String>,
        session_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            server: server.into().trim_end_matches('/').to_string(),
            session_key: session_key.into(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/", self.server, endpoint)
    }
}

/// Turn a non-success status into a protocol error carrying the body.
async fn check(endpoint: &str, resp: Response) -> Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SyncError::Protocol(format!(
        "{} returned {}: {}",
        endpoint,
        status,
        body.trim()
    )))
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send_file_actions(&self, actions: &[FileAction]) -> Result<Vec<String>, SyncError> {
        let resp = self
            .client
            .post(self.url("file-actions"))
            .query(&[("sessionKey", self.session_key.as_str())])
            .json(actions)
            .send()
            .await?;
        let needed: Option<Vec<String>> = check("file-actions", resp).await?.json().await?;
        let needed = needed.unwrap_or_default();
        debug!("sent {} actions, server needs {} bodies", actions.len(), needed.len());
        Ok(needed)
    }

    async fn upload(&self, body: Vec<u8>) -> Result<(), SyncError> {
        let resp = self
            .client
            .post(self.url("upload"))
            .query(&[("sessionKey", self.session_key.as_str())])
            .body(body)
            .send()
            .await?;
        check("upload", resp).await?;
        Ok(())
    }

    async fn download_url(&self, hash: &str) -> Result<Option<String>, SyncError> {
        let resp = self
            .client
            .post(self.url("download"))
            .form(&[("sessionKey", self.session_key.as_str()), ("fileHash", hash)])
            .send()
            .await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let url = check("download", resp).await?.text().await?;
        let url = url.trim();
        if url.is_empty() {
            Ok(None)
        } else {
            Ok(Some(url.to_string()))
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let resp = self.client.get(url).send().await?;
        let bytes = check("fetch", resp).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn pull_actions(&self, last_id: i64) -> Result<PullResponse, SyncError> {
        let last_id = last_id.to_string();
        let resp = self
            .client
            .post(self.url("clients"))
            .form(&[
                ("sessionKey", self.session_key.as_str()),
                ("lastId", last_id.as_str()),
            ])
            .send()
            .await?;
        Ok(check("clients", resp).await?.json().await?)
    }
}
