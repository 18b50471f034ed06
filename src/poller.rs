//! Pulls other clients' actions from the server.
//!
//! A pull happens at start, on every push signal, and whenever the poll
//! interval passes without one. Each batch is compacted before dispatch so
//! a create immediately undone by a delete never reaches the orchestrator.

use crate::compact::compact;
use crate::error::SyncError;
use crate::events::ChangeSink;
use crate::model::ChangeEvent;
use crate::transport::RemoteTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct RemotePoller<T> {
    transport: Arc<T>,
    last_action_id: i64,
    poll_interval: Duration,
}

impl<T: RemoteTransport> RemotePoller<T> {
    pub fn new(transport: Arc<T>, last_action_id: i64, poll_interval: Duration) -> Self {
        Self {
            transport,
            last_action_id,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn last_action_id(&self) -> i64 {
        self.last_action_id
    }

    /// Pull until the sink goes away. `signals` carries push notifications;
    /// once it closes the poller falls back to the interval alone.
    pub async fn run<S: ChangeSink>(mut self, mut signals: mpsc::Receiver<()>, sink: S) {
        let mut signals_open = true;
        loop {
            match self.pull_once(&sink).await {
                Ok(_) => {}
                Err(SyncError::Shutdown) => {
                    debug!("orchestrator gone, poller stopping");
                    return;
                }
                Err(e) => warn!("pull failed, retrying later: {}", e),
            }

            tokio::select! {
                signal = signals.recv(), if signals_open => {
                    if signal.is_none() {
                        debug!("push channel closed, polling every {:?}", self.poll_interval);
                        signals_open = false;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One pull: fetch past the cursor, compact, dispatch, then advance the
    /// cursor. Returns how many events were dispatched. On error the cursor
    /// stays where it was.
    pub async fn pull_once<S: ChangeSink>(&mut self, sink: &S) -> Result<usize, SyncError> {
        let response = self.transport.pull_actions(self.last_action_id).await?;
        let newest = response
            .file_actions
            .iter()
            .map(|a| a.id)
            .chain(std::iter::once(response.last_id))
            .max()
            .unwrap_or(self.last_action_id);

        let pulled = response.file_actions.len();
        let actions = compact(response.file_actions);
        let dispatched = actions.len();
        for action in actions {
            sink.submit(ChangeEvent::remote(action)).await?;
        }

        if newest > self.last_action_id {
            sink.advance_cursor(newest).await?;
            self.last_action_id = newest;
        }
        if pulled > 0 {
            info!(
                "pulled {} actions ({} after compaction), cursor at {}",
                pulled, dispatched, self.last_action_id
            );
        }
        Ok(dispatched)
    }
}
