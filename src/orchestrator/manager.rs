use super::status::{PendingStatus, SyncStatus};
use super::tasks::{self, TaskContext, TaskDone, TaskKind, TaskOutcome};
use crate::config::SyncConfig;
use crate::error::{ErrorMessage, SyncError};
use crate::events::ChangeSink;
use crate::fanin::{self, FanInRegistrar};
use crate::model::ChangeEvent;
use crate::state::{FileSystemState, MetadataDir};
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Messages accepted by the orchestrator loop.
#[derive(Debug)]
pub enum Inbound {
    Change(ChangeEvent),
    /// The poller consumed every server action up to this id.
    Cursor(i64),
}

/// Sending side of the orchestrator's bounded work queue.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Inbound>,
}

/// Create the bounded queue feeding an orchestrator.
pub fn channel(capacity: usize) -> (OrchestratorHandle, mpsc::Receiver<Inbound>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OrchestratorHandle { tx }, rx)
}

#[async_trait]
impl ChangeSink for OrchestratorHandle {
    async fn submit(&self, event: ChangeEvent) -> Result<(), SyncError> {
        self.tx
            .send(Inbound::Change(event))
            .await
            .map_err(|_| SyncError::Shutdown)
    }

    async fn advance_cursor(&self, last_action_id: i64) -> Result<(), SyncError> {
        self.tx
            .send(Inbound::Cursor(last_action_id))
            .await
            .map_err(|_| SyncError::Shutdown)
    }
}

const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub checkpoint_every: u64,
    pub fanin_idle_tick: Duration,
    pub max_concurrent_tasks: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for OrchestratorSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            checkpoint_every: config.checkpoint_every.max(1),
            fanin_idle_tick: config.fanin_idle_tick().max(MIN_TICK),
            max_concurrent_tasks: config.max_concurrent_tasks.max(1),
        }
    }
}

/// The one in-flight task for a path.
#[derive(Debug)]
pub struct PendingTask {
    pub task_id: u64,
    pub cancel: CancellationToken,
    pub is_create: bool,
    pub kind: TaskKind,
    pub started_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    preempted: u64,
    vetoed: u64,
}

/// Single owner of the file system state and of the per-path task table.
///
/// Every change event for a path cancels whatever task is still running for
/// it and starts a new one, so the last event always wins. Task results come
/// back through two fan-in multiplexers (done and error) and are applied
/// only if they belong to the path's current task.
pub struct Orchestrator<T> {
    settings: OrchestratorSettings,
    root: PathBuf,
    metadata: MetadataDir,
    transport: Arc<T>,
    state: FileSystemState,
    pending: HashMap<String, PendingTask>,
    next_task_id: u64,
    permits: Arc<Semaphore>,
    done: FanInRegistrar<TaskDone>,
    done_rx: mpsc::Receiver<TaskDone>,
    errors: FanInRegistrar<ErrorMessage>,
    error_rx: mpsc::Receiver<ErrorMessage>,
    counters: Counters,
    iterations: u64,
    started: SyncStatus,
    status_tx: watch::Sender<SyncStatus>,
}

impl<T: RemoteTransport> Orchestrator<T> {
    /// Must be called from within a tokio runtime: the fan-in loops are
    /// spawned here.
    pub fn new(
        settings: OrchestratorSettings,
        root: &Path,
        transport: Arc<T>,
        state: FileSystemState,
    ) -> Self {
        let (done, done_rx) = fanin::multiplex(64, true, settings.fanin_idle_tick);
        let (errors, error_rx) = fanin::multiplex(64, true, settings.fanin_idle_tick);
        let started = SyncStatus::new();
        let (status_tx, _) = watch::channel(started.clone());

        Self {
            permits: Arc::new(Semaphore::new(settings.max_concurrent_tasks)),
            settings,
            root: root.to_path_buf(),
            metadata: MetadataDir::new(root),
            transport,
            state,
            pending: HashMap::new(),
            next_task_id: 1,
            done,
            done_rx,
            errors,
            error_rx,
            counters: Counters::default(),
            iterations: 0,
            started,
            status_tx,
        }
    }

    /// Receiver for status snapshots, refreshed on every checkpoint.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> &FileSystemState {
        &self.state
    }

    /// Process the queue until every handle is dropped and the remaining
    /// tasks have reported, then persist and return the final state.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Inbound>,
    ) -> Result<FileSystemState, SyncError> {
        info!(
            "orchestrator started with {} tracked files at action {}",
            self.state.len(),
            self.state.last_action_id
        );
        let mut inbox_open = true;

        loop {
            if !inbox_open && self.pending.is_empty() {
                break;
            }

            tokio::select! {
                msg = inbox.recv(), if inbox_open => match msg {
                    Some(Inbound::Change(event)) => self.dispatch(event),
                    Some(Inbound::Cursor(id)) => self.advance_cursor(id).await,
                    None => {
                        debug!("work queue closed, draining {} tasks", self.pending.len());
                        inbox_open = false;
                    }
                },
                Some(done) = self.done_rx.recv() => self.complete(done),
                Some(failure) = self.error_rx.recv() => self.fail(failure),
            }

            self.iterations += 1;
            if self.iterations % self.settings.checkpoint_every == 0 {
                if let Err(e) = self.checkpoint().await {
                    error!("checkpoint failed: {}", e);
                }
            }
        }

        self.checkpoint().await?;
        if let Err(e) = SyncStatus::remove(&self.metadata.status_path()) {
            warn!("cannot remove status file: {}", e);
        }
        info!("orchestrator stopped");
        Ok(self.state)
    }

    fn dispatch(&mut self, mut event: ChangeEvent) {
        let path = event.path().to_string();

        if let Some(previous) = self.pending.remove(&path) {
            previous.cancel.cancel();
            self.counters.preempted += 1;
            debug!(
                task_id = previous.task_id,
                kind = %previous.kind,
                "preempted task for {}",
                path
            );
        }

        if event.is_local {
            event.previous_hash = self.state.hash_of(&path);
            if !event.is_create {
                if let Some(known) = self.state.get(&path) {
                    event.file = known.clone();
                }
            }
        }

        let task_id = self.next_task_id;
        self.next_task_id += 1;
        let kind = TaskKind::of(&event);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        self.done.register_oneshot(done_rx);
        self.errors.register_oneshot(error_rx);

        self.pending.insert(
            path.clone(),
            PendingTask {
                task_id,
                cancel: cancel.clone(),
                is_create: event.is_create,
                kind,
                started_at: Instant::now(),
            },
        );
        debug!(task_id, %kind, "dispatching {}", path);

        let ctx = TaskContext {
            task_id,
            root: self.root.clone(),
            staging: self.metadata.staging_dir(),
            transport: Arc::clone(&self.transport),
            cancel,
            permits: Arc::clone(&self.permits),
        };
        tasks::spawn(ctx, event, done_tx, error_tx);
    }

    fn is_current(&self, path: &str, task_id: u64) -> bool {
        self.pending
            .get(path)
            .is_some_and(|task| task.task_id == task_id)
    }

    fn complete(&mut self, done: TaskDone) {
        if !self.is_current(&done.path, done.task_id) {
            debug!(task_id = done.task_id, "ignoring late completion for {}", done.path);
            return;
        }
        self.pending.remove(&done.path);

        match done.outcome {
            TaskOutcome::Applied(action) => {
                self.state.apply(&action);
                self.counters.completed += 1;
            }
            TaskOutcome::Unchanged => self.counters.completed += 1,
            TaskOutcome::Vetoed => self.counters.vetoed += 1,
        }
    }

    fn fail(&mut self, failure: ErrorMessage) {
        if !self.is_current(&failure.path, failure.task_id) {
            debug!(task_id = failure.task_id, "ignoring late failure for {}", failure.path);
            return;
        }
        self.pending.remove(&failure.path);
        self.counters.failed += 1;
        error!(
            task_id = failure.task_id,
            stage = failure.stage,
            "sync of {} failed: {}",
            failure.path,
            failure.error
        );
    }

    async fn advance_cursor(&mut self, last_action_id: i64) {
        if self.state.advance_cursor(last_action_id) {
            if let Err(e) = self.checkpoint().await {
                error!("cannot persist cursor {}: {}", last_action_id, e);
            }
        }
    }

    fn snapshot(&self) -> SyncStatus {
        let mut pending: Vec<PendingStatus> = self
            .pending
            .iter()
            .map(|(path, task)| PendingStatus {
                path: path.clone(),
                task_id: task.task_id,
                kind: task.kind.to_string(),
                running_ms: task.started_at.elapsed().as_millis() as u64,
            })
            .collect();
        pending.sort_by(|a, b| a.path.cmp(&b.path));

        SyncStatus {
            last_action_id: self.state.last_action_id,
            tracked_files: self.state.len(),
            completed: self.counters.completed,
            failed: self.counters.failed,
            preempted: self.counters.preempted,
            vetoed: self.counters.vetoed,
            pending,
            ..self.started.clone()
        }
    }

    async fn checkpoint(&mut self) -> Result<(), SyncError> {
        self.metadata.save_state(&self.state).await?;
        let status = self.snapshot();
        let json = serde_json::to_string_pretty(&status)?;
        self.metadata
            .write_atomic(&self.metadata.status_path(), json.as_bytes())
            .await?;
        self.status_tx.send_replace(status);
        Ok(())
    }
}
