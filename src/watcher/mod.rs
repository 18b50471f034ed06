//! Recursive watcher over the synced root.
//!
//! Starting a watcher subscribes to OS notifications for every directory,
//! then scans the tree once and reconciles it with the persisted state. The
//! scan's synthetic events come out of the stream first. Notification-driven
//! events are held back until the caller fires the [`BeginSignal`], so the
//! caller decides when bootstrapping is over.

mod paths;
pub mod scan;

pub use paths::{is_suppressed, relative_path};

use crate::error::SyncError;
use crate::events::EventSource;
use crate::model::{ChangeEvent, FileRecord};
use crate::state::FileSystemState;
use futures::stream::{BoxStream, StreamExt};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Buffer between the notify callback thread and the event loop.
const RAW_BUFFER: usize = 4096;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Report dot-prefixed files and directories.
    pub include_hidden: bool,
    /// Capacity of the outgoing event channel.
    pub buffer: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            include_hidden: false,
            buffer: 256,
        }
    }
}

/// Releases notification-driven events. Dropping it without calling
/// [`BeginSignal::begin`] stops the watcher after the scan events.
#[derive(Debug)]
pub struct BeginSignal(oneshot::Sender<()>);

impl BeginSignal {
    pub fn begin(self) {
        let _ = self.0.send(());
    }
}

/// Scan events followed by live notifications.
pub struct WatchStream {
    scan: Vec<ChangeEvent>,
    live: mpsc::Receiver<ChangeEvent>,
}

impl WatchStream {
    /// Number of synthetic events produced by the initial scan.
    pub fn scan_len(&self) -> usize {
        self.scan.len()
    }
}

impl EventSource for WatchStream {
    fn into_events(self) -> BoxStream<'static, ChangeEvent> {
        futures::stream::iter(self.scan)
            .chain(ReceiverStream::new(self.live))
            .boxed()
    }
}

pub struct RecursiveWatcher;

impl RecursiveWatcher {
    /// Subscribe to `root`, run the initial scan against `persisted` and spawn
    /// the notification loop.
    ///
    /// Fails with [`SyncError::Directory`] when `root` is not a directory and
    /// with [`SyncError::Watch`] when the subscription cannot be established.
    pub async fn start(
        root: &Path,
        persisted: &FileSystemState,
        options: WatchOptions,
    ) -> Result<(WatchStream, BeginSignal), SyncError> {
        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(SyncError::Directory(root.to_path_buf())),
        }
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| SyncError::io(root, e))?;

        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<Event>>(RAW_BUFFER);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.blocking_send(res);
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::NonRecursive)?;

        let outcome = {
            let scan_root = root.clone();
            let persisted = persisted.clone();
            let options = options.clone();
            tokio::task::spawn_blocking(move || scan::reconcile(&scan_root, &persisted, &options))
                .await
                .map_err(|e| SyncError::io(&root, io::Error::other(e)))??
        };

        for dir in outcome.directories.iter().filter(|d| **d != root) {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!("cannot watch {}: {}", dir.display(), e);
            }
        }
        info!(
            "watching {} ({} directories, {} changes since last run)",
            root.display(),
            outcome.directories.len(),
            outcome.events.len()
        );

        let (begin_tx, begin_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(options.buffer.max(1));
        let event_loop = EventLoop {
            root,
            watcher,
            options,
            known: outcome.files,
            tx,
        };
        tokio::spawn(event_loop.run(raw_rx, begin_rx));

        Ok((
            WatchStream {
                scan: outcome.events,
                live: rx,
            },
            BeginSignal(begin_tx),
        ))
    }
}

struct EventLoop {
    root: PathBuf,
    watcher: RecommendedWatcher,
    options: WatchOptions,
    /// Files this watcher believes exist, used to expand directory removals.
    known: BTreeSet<String>,
    tx: mpsc::Sender<ChangeEvent>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut raw: mpsc::Receiver<notify::Result<Event>>,
        begin: oneshot::Receiver<()>,
    ) {
        tokio::select! {
            res = begin => {
                if res.is_err() {
                    debug!("begin signal dropped, watcher stopping");
                    return;
                }
            }
            _ = self.tx.closed() => return,
        }

        loop {
            tokio::select! {
                _ = self.tx.closed() => {
                    debug!("event consumer gone, watcher stopping");
                    return;
                }
                res = raw.recv() => match res {
                    Some(Ok(event)) => {
                        for change in self.translate(event).await {
                            if self.tx.send(change).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let err = watch_failure(&self.root, e);
                        warn!(stage = "watch", "{}", err);
                    }
                    None => return,
                },
            }
        }
    }

    async fn translate(&mut self, event: Event) -> Vec<ChangeEvent> {
        let mut changes = Vec::new();
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.appeared(path, &mut changes).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                for path in &event.paths {
                    self.vanished(path, &mut changes);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                self.vanished(&event.paths[0], &mut changes);
                self.appeared(&event.paths[1], &mut changes).await;
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if tokio::fs::symlink_metadata(path).await.is_ok() {
                        self.appeared(path, &mut changes).await;
                    } else {
                        self.vanished(path, &mut changes);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.modified(path, &mut changes).await;
                }
            }
            _ => {}
        }
        changes
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = relative_path(&self.root, path)?;
        if is_suppressed(&rel, self.options.include_hidden) {
            None
        } else {
            Some(rel)
        }
    }

    async fn appeared(&mut self, path: &Path, changes: &mut Vec<ChangeEvent>) {
        let Some(rel) = self.relative(path) else {
            return;
        };
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => self.add_directory(path, changes).await,
            Ok(meta) if meta.is_file() => {
                let record = FileRecord::from_metadata(rel.as_str(), &meta);
                self.known.insert(rel);
                changes.push(ChangeEvent::local_create(record));
            }
            Ok(_) => {}
            Err(e) => warn!("{}", SyncError::io(path, e)),
        }
    }

    async fn modified(&mut self, path: &Path, changes: &mut Vec<ChangeEvent>) {
        let Some(rel) = self.relative(path) else {
            return;
        };
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let record = FileRecord::from_metadata(rel.as_str(), &meta);
                self.known.insert(rel);
                changes.push(ChangeEvent::local_create(record));
            }
            Ok(_) => {}
            Err(e) => warn!("{}", SyncError::io(path, e)),
        }
    }

    fn vanished(&mut self, path: &Path, changes: &mut Vec<ChangeEvent>) {
        let Some(rel) = self.relative(path) else {
            return;
        };
        match std::fs::symlink_metadata(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Ok(meta) => {
                debug!("{} reported removed but exists ({:?})", rel, meta.file_type());
                return;
            }
            Err(e) => {
                warn!("{}", SyncError::io(path, e));
                return;
            }
        }

        let prefix = format!("{}/", rel);
        let children: Vec<String> = self
            .known
            .range(prefix.clone()..)
            .take_while(|p| p.starts_with(&prefix))
            .cloned()
            .collect();

        if children.is_empty() {
            if !self.known.remove(&rel) {
                debug!("{} was never reported, ignoring its removal", rel);
                return;
            }
            changes.push(ChangeEvent::local_delete(FileRecord::at_path(rel)));
            return;
        }

        // A directory moved or removed as a whole: its files get no events of their own.
        let _ = self.watcher.unwatch(path);
        for child in children {
            self.known.remove(&child);
            changes.push(ChangeEvent::local_delete(FileRecord::at_path(child)));
        }
    }

    /// Watch a directory that appeared after startup and report the files it
    /// already holds.
    async fn add_directory(&mut self, dir: &Path, changes: &mut Vec<ChangeEvent>) {
        let root = self.root.clone();
        let target = dir.to_path_buf();
        let options = self.options.clone();
        let walked = tokio::task::spawn_blocking(move || {
            scan::walk_under(&root, &target, &options, false)
        })
        .await;

        let outcome = match walked {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("cannot scan new directory: {}", e);
                return;
            }
            Err(e) => {
                warn!("directory scan task failed: {}", e);
                return;
            }
        };

        for sub in &outcome.directories {
            if let Err(e) = self.watcher.watch(sub, RecursiveMode::NonRecursive) {
                warn!("cannot watch {}: {}", sub.display(), e);
            }
        }
        debug!(
            "watching new directory {} ({} files inside)",
            dir.display(),
            outcome.files.len()
        );

        for rel in outcome.files {
            match std::fs::metadata(self.root.join(&rel)) {
                Ok(meta) => {
                    let record = FileRecord::from_metadata(rel.as_str(), &meta);
                    changes.push(ChangeEvent::local_create(record));
                    self.known.insert(rel);
                }
                Err(e) => debug!("{} vanished during directory scan: {}", rel, e),
            }
        }
    }
}

/// Attach the failing path to a notify error, falling back to the watched root.
fn watch_failure(root: &Path, e: notify::Error) -> SyncError {
    let path = e.paths.first().cloned().unwrap_or_else(|| root.to_path_buf());
    match e.kind {
        notify::ErrorKind::Io(source) => SyncError::io(path, source),
        kind => SyncError::Watch(notify::Error {
            kind,
            paths: vec![path],
        }),
    }
}
