//! Seams between event producers and the orchestrator.

use crate::error::SyncError;
use crate::model::ChangeEvent;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Something that produces change events: the local watcher, or a fake.
pub trait EventSource: Send + 'static {
    fn into_events(self) -> BoxStream<'static, ChangeEvent>;
}

/// Where change events and cursor updates are delivered.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn submit(&self, event: ChangeEvent) -> Result<(), SyncError>;

    /// Record that every server action up to `last_action_id` was consumed.
    async fn advance_cursor(&self, last_action_id: i64) -> Result<(), SyncError>;
}

#[async_trait]
impl<S: ChangeSink + ?Sized> ChangeSink for Arc<S> {
    async fn submit(&self, event: ChangeEvent) -> Result<(), SyncError> {
        (**self).submit(event).await
    }

    async fn advance_cursor(&self, last_action_id: i64) -> Result<(), SyncError> {
        (**self).advance_cursor(last_action_id).await
    }
}

/// Pump every event of `source` into `sink` until either side goes away.
/// Returns how many events were delivered.
pub async fn forward<E, S>(source: E, sink: S) -> usize
where
    E: EventSource,
    S: ChangeSink,
{
    let mut events = source.into_events();
    let mut delivered = 0;
    while let Some(event) = events.next().await {
        if let Err(e) = sink.submit(event).await {
            debug!("event sink closed: {}", e);
            break;
        }
        delivered += 1;
    }
    delivered
}
