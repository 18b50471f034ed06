//! Wires the watcher, orchestrator, poller and push listener together.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::forward;
use crate::orchestrator::{self, Orchestrator, OrchestratorSettings};
use crate::poller::RemotePoller;
use crate::state::{FileSystemState, MetadataDir};
use crate::transport::{push, RemoteTransport};
use crate::watcher::{RecursiveWatcher, WatchOptions};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info};

pub struct SyncClient<T> {
    config: SyncConfig,
    transport: Arc<T>,
}

impl<T: RemoteTransport> SyncClient<T> {
    pub fn new(config: SyncConfig, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
        }
    }

    /// Start every component and run until the orchestrator stops.
    pub async fn run(self) -> Result<FileSystemState, SyncError> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`SyncClient::run`], but once `shutdown` completes the event
    /// producers are stopped and the orchestrator drains its in-flight tasks,
    /// checkpoints and returns.
    ///
    /// Startup fails if the metadata directory cannot be created, another
    /// client holds it, the state is unreadable, or the watch cannot be
    /// established. After that, failures are per path and only logged.
    pub async fn run_until<F>(self, shutdown: F) -> Result<FileSystemState, SyncError>
    where
        F: Future<Output = ()>,
    {
        let config = self.config;
        let metadata = MetadataDir::new(&config.root);
        metadata.ensure().await?;
        let _lock = metadata.lock()?;
        let state = metadata.load_state().await?;
        let cursor = state.last_action_id;

        let options = WatchOptions {
            include_hidden: config.include_hidden,
            buffer: config.queue_capacity,
        };
        let (events, begin) = RecursiveWatcher::start(&config.root, &state, options).await?;
        info!("{} local changes found since last run", events.scan_len());

        let orchestrator = Orchestrator::new(
            OrchestratorSettings::from(&config),
            &config.root,
            Arc::clone(&self.transport),
            state,
        );
        let (handle, inbox) = orchestrator::channel(config.queue_capacity);
        let mut running = tokio::spawn(orchestrator.run(inbox));

        let watcher_handle = handle.clone();
        let mut producers = vec![tokio::spawn(async move {
            let delivered = forward(events, watcher_handle).await;
            debug!("watcher forwarding stopped after {} events", delivered);
        })];
        begin.begin();

        let (signal_tx, signal_rx) = mpsc::channel(1);
        if let Some(addr) = config.notifier.clone() {
            producers.push(tokio::spawn(push::listen(
                addr,
                config.session_key.clone(),
                signal_tx,
                config.reconnect(),
            )));
        } else {
            drop(signal_tx);
        }

        let poller = RemotePoller::new(Arc::clone(&self.transport), cursor, config.poll_interval());
        producers.push(tokio::spawn(poller.run(signal_rx, handle)));

        tokio::select! {
            result = &mut running => return joined(result),
            _ = shutdown => info!("shutting down, draining in-flight tasks"),
        }
        for producer in &producers {
            producer.abort();
        }
        joined(running.await)
    }
}

fn joined(
    result: Result<Result<FileSystemState, SyncError>, JoinError>,
) -> Result<FileSystemState, SyncError> {
    result.map_err(|e| {
        error!("orchestrator task failed: {}", e);
        SyncError::Shutdown
    })?
}
