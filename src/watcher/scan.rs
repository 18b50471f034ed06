//! Startup reconciliation of the tree against the persisted state.

use super::paths::{is_suppressed, relative_path};
use super::WatchOptions;
use crate::error::SyncError;
use crate::hash;
use crate::model::{ChangeEvent, FileRecord};
use crate::state::FileSystemState;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What a scan found.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Every directory below the root that should be watched.
    pub directories: Vec<PathBuf>,
    /// Relative paths of every file present.
    pub files: BTreeSet<String>,
    /// Synthetic events, sorted by path.
    pub events: Vec<ChangeEvent>,
}

/// Walk `root` and report what changed while the client was not running.
///
/// A file absent from `persisted` is a create, one whose digest differs is a
/// modify (a create carrying the persisted digest as `previous_hash`), and a
/// persisted path missing from disk is a delete. Unchanged files produce
/// nothing. Blocking: run it on a blocking thread.
pub fn reconcile(
    root: &Path,
    persisted: &FileSystemState,
    options: &WatchOptions,
) -> Result<ScanOutcome, SyncError> {
    let mut outcome = walk_under(root, root, options, true)?;

    let mut events = Vec::new();
    for rel in &outcome.files {
        let full = root.join(rel);
        let meta = match std::fs::metadata(&full) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("{}", SyncError::io(&full, e));
                continue;
            }
        };
        let digest = match hash::digest_blocking(&full) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("skipping {} during scan: {}", rel, e);
                continue;
            }
        };

        let record = FileRecord::from_metadata(rel.as_str(), &meta).with_hash(digest.clone());
        match persisted.get(rel) {
            None => events.push(ChangeEvent::local_create(record)),
            Some(known) if known.content_hash != digest => events.push(
                ChangeEvent::local_create(record).with_previous_hash(&known.content_hash),
            ),
            Some(_) => {}
        }
    }

    for (rel, known) in &persisted.state {
        if outcome.files.contains(rel) || is_suppressed(rel, options.include_hidden) {
            continue;
        }
        events.push(
            ChangeEvent::local_delete(known.clone()).with_previous_hash(&known.content_hash),
        );
    }

    events.sort_by(|a, b| a.path().cmp(b.path()));
    debug!(
        files = outcome.files.len(),
        changes = events.len(),
        "initial scan of {} complete",
        root.display()
    );
    outcome.events = events;
    Ok(outcome)
}

/// List the directories and files under `dir`, skipping suppressed entries.
///
/// Relative paths are computed against `root`. An unreadable `dir` is an
/// error only when `strict`; nested failures are logged and skipped.
pub fn walk_under(
    root: &Path,
    dir: &Path,
    options: &WatchOptions,
    strict: bool,
) -> Result<ScanOutcome, SyncError> {
    let mut outcome = ScanOutcome::default();
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match relative_path(root, entry.path()) {
            Some(rel) => !is_suppressed(&rel, options.include_hidden),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if strict && e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed"));
                return Err(SyncError::io(dir, source));
            }
            Err(e) => {
                warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            outcome.directories.push(entry.into_path());
        } else if file_type.is_file() {
            if let Some(rel) = relative_path(root, entry.path()) {
                outcome.files.insert(rel);
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::METADATA_DIR;
    use tempfile::tempdir;

    fn persisted(entries: &[(&str, &str)]) -> FileSystemState {
        let mut state = FileSystemState::default();
        for (path, content) in entries {
            let digest = hash::digest_bytes(content.as_bytes());
            state.upsert(FileRecord::at_path(*path).with_hash(digest));
        }
        state
    }

    #[test]
    fn test_first_scan_reports_everything_as_created() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "a").unwrap();

        let outcome =
            reconcile(dir.path(), &FileSystemState::default(), &WatchOptions::default()).unwrap();
        let paths: Vec<&str> = outcome.events.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["b.txt", "sub/a.txt"]);
        assert!(outcome.events.iter().all(|e| e.is_create && e.is_local));
        assert_eq!(outcome.events[0].file.content_hash, hash::digest_bytes(b"b"));
        assert_eq!(outcome.events[0].file.size, 1);
        assert_eq!(outcome.directories.len(), 2);
    }

    #[test]
    fn test_reconcile_against_persisted_state() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("same.txt"), "same").unwrap();
        std::fs::write(dir.path().join("changed.txt"), "new").unwrap();
        std::fs::write(dir.path().join("added.txt"), "added").unwrap();
        let state = persisted(&[
            ("same.txt", "same"),
            ("changed.txt", "old"),
            ("gone.txt", "gone"),
        ]);

        let outcome = reconcile(dir.path(), &state, &WatchOptions::default()).unwrap();
        let summary: Vec<(&str, bool, &str)> = outcome
            .events
            .iter()
            .map(|e| (e.path(), e.is_create, e.previous_hash.as_str()))
            .collect();

        let old = hash::digest_bytes(b"old");
        let gone = hash::digest_bytes(b"gone");
        assert_eq!(
            summary,
            vec![
                ("added.txt", true, ""),
                ("changed.txt", true, old.as_str()),
                ("gone.txt", false, gone.as_str()),
            ]
        );
    }

    #[test]
    fn test_scan_skips_metadata_and_temp_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(METADATA_DIR).join("tmp")).unwrap();
        std::fs::write(dir.path().join(METADATA_DIR).join("state.json"), "{}").unwrap();
        std::fs::write(dir.path().join("partial.tmp"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::write(dir.path().join("real.txt"), "x").unwrap();

        let outcome =
            reconcile(dir.path(), &FileSystemState::default(), &WatchOptions::default()).unwrap();
        let paths: Vec<&str> = outcome.events.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["real.txt"]);
        assert_eq!(outcome.directories, vec![dir.path().to_path_buf()]);

        let options = WatchOptions {
            include_hidden: true,
            ..WatchOptions::default()
        };
        let outcome = reconcile(dir.path(), &FileSystemState::default(), &options).unwrap();
        let paths: Vec<&str> = outcome.events.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec![".hidden", "real.txt"]);
    }

    #[test]
    fn test_hidden_persisted_entries_not_deleted_when_hidden_excluded() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "x").unwrap();
        let state = persisted(&[(".env", "x")]);

        let outcome = reconcile(dir.path(), &state, &WatchOptions::default()).unwrap();
        assert!(outcome.events.is_empty());
    }
}
