use crate::state::{METADATA_DIR, TEMP_EXTENSION};
use std::path::{Component, Path};

/// Path of `path` relative to `root`, `/`-separated. `None` for the root
/// itself or anything outside it.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether a relative path is never reported: the metadata directory, the
/// client's own temporary files, and hidden entries unless asked for.
pub fn is_suppressed(rel: &str, include_hidden: bool) -> bool {
    let mut components = rel.split('/').peekable();
    if components.peek() == Some(&METADATA_DIR) {
        return true;
    }
    let temp_suffix = format!(".{}", TEMP_EXTENSION);
    if rel.ends_with(&temp_suffix) {
        return true;
    }
    !include_hidden && components.any(|c| c.starts_with('.'))
}
