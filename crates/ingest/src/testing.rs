//! Hand-written doubles shared by the unit tests.

use blamemux_types::{
    ActionType, AuthorIndex, BlameRecord, BlamemuxError, CommandError, FileRevision, FileType,
    NewCommit, Ownership, ProcessedSet, RepoKind, RepoStats, Repository, RepositoryRecord, Result,
    RevisionCursor, SchemaStatus, Store,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

// ── MockStore ─────────────────────────────────────────────────────────────

pub(crate) struct MockStore {
    pub repository_id: Option<i64>,
    pub revisions: Vec<FileRevision>,
    pub paths: HashMap<(i64, i64), String>,
    pub authors: Vec<(String, i64)>,
    pub code_files: HashSet<i64>,
    pub processed: Vec<(i64, i64)>,
    pub blame_table_exists: Mutex<bool>,
    pub next_id: i64,
    pub inserted: Mutex<Vec<Vec<BlameRecord>>>,
    pub processed_loads: Mutex<usize>,
}

impl MockStore {
    pub fn new(repository_id: i64) -> Self {
        MockStore {
            repository_id: Some(repository_id),
            revisions: Vec::new(),
            paths: HashMap::new(),
            authors: Vec::new(),
            code_files: HashSet::new(),
            processed: Vec::new(),
            blame_table_exists: Mutex::new(false),
            next_id: 1,
            inserted: Mutex::new(Vec::new()),
            processed_loads: Mutex::new(0),
        }
    }

    /// Record `file_id` at `path` touched by `commit_id` with `revision`.
    pub fn touch(
        &mut self,
        commit_id: i64,
        revision: &str,
        file_id: i64,
        path: &str,
        action: ActionType,
    ) {
        let action_id = self.revisions.len() as i64 + 1;
        self.revisions.push(FileRevision {
            action_id,
            commit_id,
            file_id,
            revision: revision.to_string(),
            action,
            composed: false,
            date: commit_id * 100,
        });
        self.paths.insert((file_id, commit_id), path.to_string());
        self.code_files.insert(file_id);
    }

    pub fn batches(&self) -> Vec<Vec<BlameRecord>> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn rows(&self) -> Vec<BlameRecord> {
        self.batches().into_iter().flatten().collect()
    }
}

impl Store for MockStore {
    fn add_repository(&self, _uri: &str, _name: &str, _kind: &RepoKind) -> Result<i64> {
        unimplemented!()
    }

    fn repository_id(&self, _uri: &str) -> Result<Option<i64>> {
        Ok(self.repository_id)
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        unimplemented!()
    }

    fn add_person(&self, _name: &str, _email: &str) -> Result<i64> {
        unimplemented!()
    }

    fn commit_exists(&self, _repository_id: i64, _rev: &str) -> Result<bool> {
        unimplemented!()
    }

    fn add_commit(&self, _commit: &NewCommit) -> Result<i64> {
        unimplemented!()
    }

    fn add_file(&self, _repository_id: i64, _file_name: &str) -> Result<i64> {
        unimplemented!()
    }

    fn add_file_link(&self, _parent_id: i64, _file_id: i64, _commit_id: i64) -> Result<()> {
        unimplemented!()
    }

    fn add_action(&self, _action: ActionType, _file_id: i64, _commit_id: i64) -> Result<()> {
        unimplemented!()
    }

    fn discard_commit(&self, _commit_id: i64) -> Result<()> {
        unimplemented!()
    }

    fn current_paths(&self, _repository_id: i64) -> Result<Vec<(String, i64)>> {
        unimplemented!()
    }

    fn file_revisions(
        &self,
        _repository_id: i64,
        after: Option<RevisionCursor>,
        limit: usize,
    ) -> Result<Vec<FileRevision>> {
        let key = |c: RevisionCursor| (c.date, c.commit_id, c.action_id);
        Ok(self
            .revisions
            .iter()
            .filter(|r| after.map_or(true, |a| key(r.cursor()) > key(a)))
            .take(limit)
            .cloned()
            .collect())
    }

    fn file_path(&self, file_id: i64, commit_id: i64) -> Result<String> {
        self.paths
            .get(&(file_id, commit_id))
            .cloned()
            .ok_or_else(|| BlamemuxError::NotFound(format!("file {} @ {}", file_id, commit_id)))
    }

    fn authors(&self) -> Result<AuthorIndex> {
        Ok(self.authors.iter().cloned().collect())
    }

    fn create_file_types_table(&self) -> Result<SchemaStatus> {
        unimplemented!()
    }

    fn unclassified_files(&self, _repository_id: i64) -> Result<Vec<(i64, String)>> {
        unimplemented!()
    }

    fn insert_file_types(&self, _rows: &[(i64, FileType)]) -> Result<()> {
        unimplemented!()
    }

    fn backout_file_types(&self, _repository_id: i64) -> Result<usize> {
        unimplemented!()
    }

    fn code_files(&self, _repository_id: i64) -> Result<HashSet<i64>> {
        Ok(self.code_files.clone())
    }

    fn create_blame_table(&self) -> Result<SchemaStatus> {
        let mut exists = self.blame_table_exists.lock().unwrap();
        if *exists {
            return Ok(SchemaStatus::AlreadyExists);
        }
        *exists = true;
        Ok(SchemaStatus::Created)
    }

    fn next_blame_id(&self) -> Result<i64> {
        Ok(self.next_id)
    }

    fn processed_pairs(&self, _repository_id: i64) -> Result<ProcessedSet> {
        *self.processed_loads.lock().unwrap() += 1;
        Ok(self.processed.iter().copied().collect())
    }

    fn insert_blame_batch(&self, rows: &[BlameRecord]) -> Result<()> {
        self.inserted.lock().unwrap().push(rows.to_vec());
        Ok(())
    }

    fn backout_blame(&self, _repository_id: i64) -> Result<usize> {
        let mut inserted = self.inserted.lock().unwrap();
        let removed = inserted.iter().map(Vec::len).sum();
        inserted.clear();
        Ok(removed)
    }

    fn repo_stats(&self, _repository_id: i64) -> Result<RepoStats> {
        unimplemented!()
    }

    fn owners(&self, _file_id: i64) -> Result<Option<Ownership>> {
        unimplemented!()
    }
}

// ── FailingActions ────────────────────────────────────────────────────────

/// Delegates to `inner` but fails the `fail_on`-th call to `add_action`.
pub(crate) struct FailingActions<S> {
    pub inner: S,
    fail_on: usize,
    actions: Mutex<usize>,
}

impl<S: Store> FailingActions<S> {
    pub fn new(inner: S, fail_on: usize) -> Self {
        FailingActions {
            inner,
            fail_on,
            actions: Mutex::new(0),
        }
    }
}

impl<S: Store> Store for FailingActions<S> {
    fn add_repository(&self, uri: &str, name: &str, kind: &RepoKind) -> Result<i64> {
        self.inner.add_repository(uri, name, kind)
    }

    fn repository_id(&self, uri: &str) -> Result<Option<i64>> {
        self.inner.repository_id(uri)
    }

    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>> {
        self.inner.list_repositories()
    }

    fn add_person(&self, name: &str, email: &str) -> Result<i64> {
        self.inner.add_person(name, email)
    }

    fn commit_exists(&self, repository_id: i64, rev: &str) -> Result<bool> {
        self.inner.commit_exists(repository_id, rev)
    }

    fn add_commit(&self, commit: &NewCommit) -> Result<i64> {
        self.inner.add_commit(commit)
    }

    fn add_file(&self, repository_id: i64, file_name: &str) -> Result<i64> {
        self.inner.add_file(repository_id, file_name)
    }

    fn add_file_link(&self, parent_id: i64, file_id: i64, commit_id: i64) -> Result<()> {
        self.inner.add_file_link(parent_id, file_id, commit_id)
    }

    fn add_action(&self, action: ActionType, file_id: i64, commit_id: i64) -> Result<()> {
        let mut calls = self.actions.lock().unwrap();
        *calls += 1;
        if *calls == self.fail_on {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        self.inner.add_action(action, file_id, commit_id)
    }

    fn discard_commit(&self, commit_id: i64) -> Result<()> {
        self.inner.discard_commit(commit_id)
    }

    fn current_paths(&self, repository_id: i64) -> Result<Vec<(String, i64)>> {
        self.inner.current_paths(repository_id)
    }

    fn file_revisions(
        &self,
        repository_id: i64,
        after: Option<RevisionCursor>,
        limit: usize,
    ) -> Result<Vec<FileRevision>> {
        self.inner.file_revisions(repository_id, after, limit)
    }

    fn file_path(&self, file_id: i64, commit_id: i64) -> Result<String> {
        self.inner.file_path(file_id, commit_id)
    }

    fn authors(&self) -> Result<AuthorIndex> {
        self.inner.authors()
    }

    fn create_file_types_table(&self) -> Result<SchemaStatus> {
        self.inner.create_file_types_table()
    }

    fn unclassified_files(&self, repository_id: i64) -> Result<Vec<(i64, String)>> {
        self.inner.unclassified_files(repository_id)
    }

    fn insert_file_types(&self, rows: &[(i64, FileType)]) -> Result<()> {
        self.inner.insert_file_types(rows)
    }

    fn backout_file_types(&self, repository_id: i64) -> Result<usize> {
        self.inner.backout_file_types(repository_id)
    }

    fn code_files(&self, repository_id: i64) -> Result<HashSet<i64>> {
        self.inner.code_files(repository_id)
    }

    fn create_blame_table(&self) -> Result<SchemaStatus> {
        self.inner.create_blame_table()
    }

    fn next_blame_id(&self) -> Result<i64> {
        self.inner.next_blame_id()
    }

    fn processed_pairs(&self, repository_id: i64) -> Result<ProcessedSet> {
        self.inner.processed_pairs(repository_id)
    }

    fn insert_blame_batch(&self, rows: &[BlameRecord]) -> Result<()> {
        self.inner.insert_blame_batch(rows)
    }

    fn backout_blame(&self, repository_id: i64) -> Result<usize> {
        self.inner.backout_blame(repository_id)
    }

    fn repo_stats(&self, repository_id: i64) -> Result<RepoStats> {
        self.inner.repo_stats(repository_id)
    }

    fn owners(&self, file_id: i64) -> Result<Option<Ownership>> {
        self.inner.owners(file_id)
    }
}

// ── ScriptedRepository ────────────────────────────────────────────────────

pub(crate) enum Script {
    Lines(Vec<String>),
    /// Emit the lines, then fail as a non-zero exit would.
    FailAfter(Vec<String>),
}

/// Repository whose blame output is fixed per (relative path, revision).
pub(crate) struct ScriptedRepository {
    kind: RepoKind,
    uri: String,
    path_uri: Option<String>,
    scripts: HashMap<(String, String), Script>,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl ScriptedRepository {
    pub fn new(kind: RepoKind, uri: &str) -> Self {
        ScriptedRepository {
            kind,
            uri: uri.to_string(),
            path_uri: None,
            scripts: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(mut self, path: &str, revision: &str, script: Script) -> Self {
        self.scripts
            .insert((path.to_string(), revision.to_string()), script);
        self
    }

    pub fn with_path_uri(mut self, uri: &str) -> Self {
        self.path_uri = Some(uri.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Repository for ScriptedRepository {
    fn kind(&self) -> RepoKind {
        self.kind.clone()
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn uri_for_path(&self, path: &Path) -> Result<String> {
        self.path_uri.clone().ok_or_else(|| {
            BlamemuxError::Unsupported(format!("no uri for {}", path.display()))
        })
    }

    fn blames_remote(&self) -> bool {
        self.kind == RepoKind::Svn
    }

    fn blame(
        &self,
        path: &Path,
        revision: &str,
        _timeout: Option<Duration>,
        sink: &mut dyn FnMut(&str),
    ) -> std::result::Result<(), CommandError> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), revision.to_string()));
        let script = self
            .scripts
            .iter()
            .find(|((rel, rev), _)| rev == revision && path.ends_with(rel))
            .map(|(_, script)| script);
        let failure = || CommandError::Failed {
            cmd: format!("blame -r {} {}", revision, path.display()),
            code: 1,
            stderr: "scripted failure".into(),
        };
        match script {
            Some(Script::Lines(lines)) => {
                for line in lines {
                    sink(line.as_str());
                }
                Ok(())
            }
            Some(Script::FailAfter(lines)) => {
                for line in lines {
                    sink(line.as_str());
                }
                Err(failure())
            }
            None => Err(failure()),
        }
    }
}

/// `svn blame` output attributing `count` consecutive lines to each author.
pub(crate) fn svn_lines(runs: &[(&str, usize)]) -> Vec<String> {
    let mut lines = Vec::new();
    for (author, count) in runs {
        for _ in 0..*count {
            lines.push(format!("{:>6} {:>10} line {}", 1, author, lines.len() + 1));
        }
    }
    lines
}
