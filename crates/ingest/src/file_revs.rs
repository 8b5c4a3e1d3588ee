//! History enumeration: which (file, commit) pairs still need blaming.

use blamemux_types::{
    ActionType, FileRevision, ProcessedSet, RepoKind, Repository, Result, RevisionCursor,
    RevisionEntry, Store,
};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use tracing::debug;

const PAGE_SIZE: usize = 1000;

/// Lazily pages through a repository's history in commit order.
pub struct FileRevs<'a> {
    store: &'a dyn Store,
    repository_id: i64,
    cursor: Option<RevisionCursor>,
    page: VecDeque<FileRevision>,
    exhausted: bool,
}

impl<'a> FileRevs<'a> {
    pub fn new(store: &'a dyn Store, repository_id: i64) -> Self {
        Self {
            store,
            repository_id,
            cursor: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }
}

impl Iterator for FileRevs<'_> {
    type Item = Result<FileRevision>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            match self
                .store
                .file_revisions(self.repository_id, self.cursor, PAGE_SIZE)
            {
                Ok(page) => {
                    self.exhausted = page.len() < PAGE_SIZE;
                    self.cursor = page.last().map(FileRevision::cursor).or(self.cursor);
                    self.page = page.into();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.page.pop_front().map(Ok)
    }
}

/// Per-kind path normalization and skip rules.
#[derive(Debug, Clone)]
pub struct PathRules {
    kind: RepoKind,
    cvs_module: Option<String>,
}

impl PathRules {
    /// Build the rules for `repo` checked out at `local_root`. For CVS this
    /// detects the module the checkout points at.
    pub fn new(repo: &dyn Repository, local_root: &Path) -> Result<Self> {
        let kind = repo.kind();
        let cvs_module = match kind {
            RepoKind::Cvs => {
                let uri = repo.uri_for_path(local_root)?;
                let module = uri.strip_prefix(repo.uri()).unwrap_or(&uri).trim_matches('/');
                (!module.is_empty() && module != ".").then(|| module.to_string())
            }
            _ => None,
        };
        Ok(Self::with_module(kind, cvs_module))
    }

    pub fn with_module(kind: RepoKind, cvs_module: Option<String>) -> Self {
        Self { kind, cvs_module }
    }

    /// The path to blame, or `None` when the entry is never attributed.
    pub fn apply(&self, path: &str) -> Option<String> {
        match &self.kind {
            RepoKind::Svn if path.trim_matches('/') == "tags" => None,
            RepoKind::Cvs => {
                let stripped = match &self.cvs_module {
                    Some(module) => path
                        .trim_start_matches('/')
                        .strip_prefix(module.as_str())
                        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
                        .unwrap_or(path),
                    None => path,
                };
                Some(stripped.trim_matches('/').to_string())
            }
            _ => Some(path.to_string()),
        }
    }
}

/// Yields the revision entries that still need a blame job.
pub struct WorkEnumerator<'a> {
    revs: FileRevs<'a>,
    store: &'a dyn Store,
    eligible: &'a HashSet<i64>,
    processed: &'a ProcessedSet,
    rules: &'a PathRules,
    /// Pairs skipped because blame rows already exist.
    pub already_processed: usize,
    /// Entries dropped by deletion or path rules.
    pub skipped: usize,
}

impl<'a> WorkEnumerator<'a> {
    pub fn new(
        store: &'a dyn Store,
        repository_id: i64,
        eligible: &'a HashSet<i64>,
        processed: &'a ProcessedSet,
        rules: &'a PathRules,
    ) -> Self {
        Self {
            revs: FileRevs::new(store, repository_id),
            store,
            eligible,
            processed,
            rules,
            already_processed: 0,
            skipped: 0,
        }
    }
}

impl Iterator for WorkEnumerator<'_> {
    type Item = Result<RevisionEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rev = match self.revs.next()? {
                Ok(rev) => rev,
                Err(e) => return Some(Err(e)),
            };
            if !self.eligible.contains(&rev.file_id) {
                continue;
            }
            if self.processed.contains(rev.file_id, rev.commit_id) {
                debug!(
                    file_id = rev.file_id,
                    commit_id = rev.commit_id,
                    "already processed"
                );
                self.already_processed += 1;
                continue;
            }
            if rev.action == ActionType::Deleted {
                self.skipped += 1;
                continue;
            }

            let raw_path = match self.store.file_path(rev.file_id, rev.commit_id) {
                Ok(path) => path,
                Err(e) => return Some(Err(e)),
            };
            let Some(path) = self.rules.apply(&raw_path) else {
                debug!(path = %raw_path, commit_id = rev.commit_id, "skipping tag snapshot");
                self.skipped += 1;
                continue;
            };
            debug!(file_id = rev.file_id, commit_id = rev.commit_id, path = %path, "resolved path");

            return Some(Ok(RevisionEntry {
                file_id: rev.file_id,
                commit_id: rev.commit_id,
                path,
                revision_label: rev.revision,
                is_composed: rev.composed,
            }));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
