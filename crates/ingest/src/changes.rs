use blamemux_types::{BlamemuxError, Result};

/// A path-level change recorded for one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(String),
    Modified(String),
    Deleted(String),
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::Added(p) | Change::Modified(p) | Change::Deleted(p) => p,
        }
    }

    fn order(&self) -> u8 {
        match self {
            Change::Deleted(_) => 0,
            Change::Modified(_) => 1,
            Change::Added(_) => 2,
        }
    }
}

fn ingest_err(e: git2::Error) -> BlamemuxError {
    BlamemuxError::Ingest(e.message().to_string())
}

fn delta_path(file: &git2::DiffFile<'_>) -> Option<String> {
    file.path().and_then(|p| p.to_str()).map(str::to_string)
}

/// Changes `commit` makes relative to its first parent. Deletions come first
/// so a path removed and re-added in one commit resolves to the new file.
pub fn commit_changes(repo: &git2::Repository, commit: &git2::Commit) -> Result<Vec<Change>> {
    let parent_tree = if commit.parent_count() > 0 {
        Some(commit.parent(0).map_err(ingest_err)?.tree().map_err(ingest_err)?)
    } else {
        None
    };
    let commit_tree = commit.tree().map_err(ingest_err)?;
    let diff = repo
        .diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), None)
        .map_err(ingest_err)?;

    let mut changes = Vec::new();
    for delta in diff.deltas() {
        if delta.new_file().is_binary() || delta.old_file().is_binary() {
            continue;
        }
        // Submodule pointers are not files.
        if delta.new_file().mode() == git2::FileMode::Commit
            || delta.old_file().mode() == git2::FileMode::Commit
        {
            continue;
        }

        let old = delta_path(&delta.old_file());
        let new = delta_path(&delta.new_file());
        match delta.status() {
            git2::Delta::Added | git2::Delta::Untracked => changes.extend(new.map(Change::Added)),
            git2::Delta::Modified | git2::Delta::Typechange => {
                changes.extend(new.or(old).map(Change::Modified))
            }
            git2::Delta::Deleted => changes.extend(old.map(Change::Deleted)),
            git2::Delta::Renamed => {
                changes.extend(old.map(Change::Deleted));
                changes.extend(new.map(Change::Added));
            }
            git2::Delta::Copied => changes.extend(new.map(Change::Added)),
            _ => {}
        }
    }
    changes.sort_by_key(Change::order);
    Ok(changes)
}
