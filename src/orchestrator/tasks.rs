//! The four task chains the orchestrator dispatches.
//!
//! A chain runs on its own tokio task and reports exactly once: a
//! [`TaskDone`] on its done signal, an [`ErrorMessage`] on its error signal,
//! or nothing at all when cancelled. The cancel token is checked before
//! every blocking step and right before the final filesystem mutation; a
//! step already in progress is allowed to finish.

use crate::error::{ErrorMessage, SyncError};
use crate::hash;
use crate::model::{ChangeEvent, FileAction, FileRecord};
use crate::state::{METADATA_DIR, TEMP_EXTENSION};
use crate::transport::RemoteTransport;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Local create or modify: hash, report, upload if needed.
    Upload,
    /// Remote create or modify: fetch and install.
    Download,
    /// Local delete: report it.
    LocalDelete,
    /// Remote delete: remove the local file if it is still the deleted version.
    RemoteDelete,
}

impl TaskKind {
    pub fn of(event: &ChangeEvent) -> Self {
        match (event.is_create, event.is_local) {
            (true, true) => TaskKind::Upload,
            (true, false) => TaskKind::Download,
            (false, true) => TaskKind::LocalDelete,
            (false, false) => TaskKind::RemoteDelete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Upload => "upload",
            TaskKind::Download => "download",
            TaskKind::LocalDelete => "local-delete",
            TaskKind::RemoteDelete => "remote-delete",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum TaskOutcome {
    /// The action took effect; apply it to the state.
    Applied(FileAction),
    /// Nothing to do, the state stays as it is.
    Unchanged,
    /// A remote delete was refused to protect local edits.
    Vetoed,
}

/// Payload of a task's done signal.
#[derive(Debug)]
pub struct TaskDone {
    pub task_id: u64,
    pub path: String,
    pub outcome: TaskOutcome,
}

enum Interrupt {
    Cancelled,
    Failed(&'static str, SyncError),
}

type Step<T> = Result<T, Interrupt>;

trait StageExt<T> {
    fn stage(self, stage: &'static str) -> Step<T>;
}

impl<T> StageExt<T> for Result<T, SyncError> {
    fn stage(self, stage: &'static str) -> Step<T> {
        self.map_err(|e| Interrupt::Failed(stage, e))
    }
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
    move |e| SyncError::io(path, e)
}

/// Everything one chain needs.
pub(crate) struct TaskContext<T> {
    pub task_id: u64,
    pub root: PathBuf,
    pub staging: PathBuf,
    pub transport: Arc<T>,
    pub cancel: CancellationToken,
    pub permits: Arc<Semaphore>,
}

/// Run the chain for `event` on a new task, reporting on `done` or `error`.
pub(crate) fn spawn<T: RemoteTransport>(
    ctx: TaskContext<T>,
    event: ChangeEvent,
    done: oneshot::Sender<TaskDone>,
    error: oneshot::Sender<ErrorMessage>,
) {
    tokio::spawn(async move {
        let path = event.path().to_string();
        let kind = TaskKind::of(&event);
        match ctx.run(kind, event).await {
            Ok(outcome) => {
                let _ = done.send(TaskDone {
                    task_id: ctx.task_id,
                    path,
                    outcome,
                });
            }
            Err(Interrupt::Cancelled) => {
                // Dropping both senders retires the signals without a value.
                debug!(task_id = ctx.task_id, %kind, "cancelled {}", path);
            }
            Err(Interrupt::Failed(stage, e)) => {
                let _ = error.send(ErrorMessage {
                    task_id: ctx.task_id,
                    path,
                    stage,
                    error: e,
                });
            }
        }
    });
}

impl<T: RemoteTransport> TaskContext<T> {
    fn checkpoint(&self) -> Step<()> {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Map a server-relative path into the root, refusing anything that
    /// could escape it or land in the metadata directory.
    fn resolve(&self, rel: &str) -> Result<PathBuf, SyncError> {
        let mut components = rel.split('/');
        let safe = !rel.is_empty()
            && rel
                .split('/')
                .all(|c| !c.is_empty() && c != "." && c != "..")
            && components.next() != Some(METADATA_DIR);
        if !safe {
            return Err(SyncError::Protocol(format!("refusing unsafe path {:?}", rel)));
        }
        Ok(self.root.join(rel))
    }

    async fn run(&self, kind: TaskKind, event: ChangeEvent) -> Step<TaskOutcome> {
        let _permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| Interrupt::Cancelled)?
            }
            _ = self.cancel.cancelled() => return Err(Interrupt::Cancelled),
        };

        match kind {
            TaskKind::Upload => self.upload(event).await,
            TaskKind::Download => self.download(event).await,
            TaskKind::LocalDelete => self.local_delete(event).await,
            TaskKind::RemoteDelete => self.remote_delete(event).await,
        }
    }

    async fn upload(&self, event: ChangeEvent) -> Step<TaskOutcome> {
        let path = self.resolve(event.path()).stage("hash")?;

        self.checkpoint()?;
        let digest = hash::digest(&path).await.stage("hash")?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(io_at(&path))
            .stage("hash")?;

        let record = FileRecord::from_metadata(event.path(), &meta).with_hash(&digest);
        let action = ChangeEvent {
            file: record,
            ..event
        }
        .to_action();

        if digest == action.previous_hash {
            debug!("{} unchanged since last sync", action.path());
            return Ok(TaskOutcome::Applied(action));
        }

        self.checkpoint()?;
        let needed = self
            .transport
            .send_file_actions(std::slice::from_ref(&action))
            .await
            .stage("send")?;

        if needed.iter().any(|h| *h == digest) {
            self.checkpoint()?;
            let body = tokio::fs::read(&path)
                .await
                .map_err(io_at(&path))
                .stage("upload")?;
            if hash::digest_bytes(&body) != digest {
                let e = std::io::Error::other("content changed since hashing");
                return Err(Interrupt::Failed("upload", SyncError::io(&path, e)));
            }

            self.checkpoint()?;
            self.transport.upload(body).await.stage("upload")?;
            info!("uploaded {} ({} bytes)", action.path(), action.file.size);
        } else {
            info!("reported {}", action.path());
        }

        Ok(TaskOutcome::Applied(action))
    }

    async fn download(&self, event: ChangeEvent) -> Step<TaskOutcome> {
        let target = self.resolve(event.path()).stage("download")?;
        let action = event.to_action();
        let wanted = action.file.content_hash.clone();

        self.checkpoint()?;
        match hash::digest(&target).await {
            Ok(local) if local == wanted => {
                debug!("{} already holds {}", action.path(), wanted);
                return Ok(TaskOutcome::Applied(action));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(Interrupt::Failed("download", e)),
        }

        self.checkpoint()?;
        let url = self
            .transport
            .download_url(&wanted)
            .await
            .stage("download")?
            .ok_or_else(|| {
                Interrupt::Failed(
                    "download",
                    SyncError::Protocol(format!("content {} is not available", wanted)),
                )
            })?;

        self.checkpoint()?;
        let body = self.transport.fetch(&url).await.stage("fetch")?;
        if hash::digest_bytes(&body) != wanted {
            return Err(Interrupt::Failed(
                "fetch",
                SyncError::Protocol(format!("body fetched for {} does not match its hash", wanted)),
            ));
        }

        self.checkpoint()?;
        let staged = self
            .staging
            .join(format!("{}.{}", uuid::Uuid::new_v4(), TEMP_EXTENSION));
        tokio::fs::write(&staged, &body)
            .await
            .map_err(io_at(&staged))
            .stage("install")?;

        let installed = self.install(&staged, &target).await;
        if installed.is_err() {
            let _ = tokio::fs::remove_file(&staged).await;
        }
        installed?;

        info!("downloaded {} ({} bytes)", action.path(), body.len());
        Ok(TaskOutcome::Applied(action))
    }

    async fn install(&self, staged: &Path, target: &Path) -> Step<()> {
        self.checkpoint()?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_at(parent))
                .stage("install")?;
        }
        tokio::fs::rename(staged, target)
            .await
            .map_err(io_at(target))
            .stage("install")
    }

    async fn local_delete(&self, event: ChangeEvent) -> Step<TaskOutcome> {
        let path = self.resolve(event.path()).stage("delete")?;

        self.checkpoint()?;
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            debug!("{} exists again, dropping stale delete", event.path());
            return Ok(TaskOutcome::Unchanged);
        }

        // Always reported: an upload preempted after its send leaves no state entry.
        let mut action = event.to_action();
        if !action.previous_hash.is_empty() {
            action.file.content_hash = action.previous_hash.clone();
        }

        self.checkpoint()?;
        self.transport
            .send_file_actions(std::slice::from_ref(&action))
            .await
            .stage("send")?;
        info!("reported deletion of {}", action.path());
        Ok(TaskOutcome::Applied(action))
    }

    async fn remote_delete(&self, event: ChangeEvent) -> Step<TaskOutcome> {
        let path = self.resolve(event.path()).stage("delete")?;
        let action = event.to_action();

        self.checkpoint()?;
        let local = match hash::digest(&path).await {
            Ok(local) => local,
            Err(e) if e.is_not_found() => return Ok(TaskOutcome::Applied(action)),
            Err(e) => return Err(Interrupt::Failed("delete", e)),
        };
        if local != action.previous_hash {
            info!(
                "keeping {}: local content differs from the version deleted remotely",
                action.path()
            );
            return Ok(TaskOutcome::Vetoed);
        }

        self.checkpoint()?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Interrupt::Failed("delete", SyncError::io(&path, e))),
        }
        info!("deleted {}", action.path());
        Ok(TaskOutcome::Applied(action))
    }
}
