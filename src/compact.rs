//! Cancels create/delete pairs out of a batch of actions before dispatch.

use crate::model::FileAction;
use std::collections::HashMap;

type ActionKey = (bool, String, String);

fn key(is_create: bool, action: &FileAction) -> ActionKey {
    (
        is_create,
        action.file.path.clone(),
        action.file.content_hash.clone(),
    )
}

/// Remove every create that is annulled by a delete of the same path and
/// content hash in the same batch, and vice versa.
///
/// With N creates and M deletes on one `(path, hash)`, `min(N, M)` of each
/// are removed regardless of their relative order. The survivors keep their
/// input order; actions on other paths or hashes are untouched.
pub fn compact(actions: Vec<FileAction>) -> Vec<FileAction> {
    let mut remaining: HashMap<ActionKey, usize> = HashMap::new();
    for action in &actions {
        *remaining.entry(key(action.is_create, action)).or_insert(0) += 1;
    }

    let mut kept = Vec::with_capacity(actions.len());
    for action in actions {
        match remaining.get_mut(&key(!action.is_create, &action)) {
            Some(count) if *count > 0 => *count -= 1,
            _ => kept.push(action),
        }
    }
    kept
}
