use blamemux_types::{
    ActionType, BlamemuxError, ImportSummary, Importer, NewCommit, RepoKind, Result, Store,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::changes::{self, Change};

fn ingest_err(e: git2::Error) -> BlamemuxError {
    BlamemuxError::Ingest(e.message().to_string())
}

/// Path-to-file-id map of the files alive at the commit being imported.
struct LiveTree {
    repository_id: i64,
    ids: HashMap<String, i64>,
}

impl LiveTree {
    fn load(store: &dyn Store, repository_id: i64) -> Result<Self> {
        Ok(Self {
            repository_id,
            ids: store.current_paths(repository_id)?.into_iter().collect(),
        })
    }

    /// Id of the directory holding `path`, creating missing directories.
    fn parent_dir(&mut self, store: &dyn Store, path: &str, commit_id: i64) -> Result<i64> {
        let Some((dir, _)) = path.rsplit_once('/') else {
            return Ok(-1);
        };
        if let Some(&id) = self.ids.get(dir) {
            return Ok(id);
        }
        let parent = self.parent_dir(store, dir, commit_id)?;
        let name = dir.rsplit('/').next().unwrap_or(dir);
        let id = store.add_file(self.repository_id, name)?;
        store.add_file_link(parent, id, commit_id)?;
        self.ids.insert(dir.to_string(), id);
        Ok(id)
    }

    fn add(&mut self, store: &dyn Store, path: &str, commit_id: i64) -> Result<i64> {
        let parent = self.parent_dir(store, path, commit_id)?;
        let name = path.rsplit('/').next().unwrap_or(path);
        let id = store.add_file(self.repository_id, name)?;
        store.add_file_link(parent, id, commit_id)?;
        self.ids.insert(path.to_string(), id);
        Ok(id)
    }
}

/// Imports git history into the history tables.
pub struct GitImporter;

impl GitImporter {
    pub fn new() -> Self {
        GitImporter
    }

    fn import_commit(
        &self,
        git_repo: &git2::Repository,
        git_commit: &git2::Commit,
        mailmap: &git2::Mailmap,
        repository_id: i64,
        tree: &mut LiveTree,
        store: &dyn Store,
    ) -> Result<usize> {
        // Blame output names authors through the mailmap, so people must too.
        let author = git_commit.author_with_mailmap(mailmap).map_err(ingest_err)?;
        let committer = git_commit
            .committer_with_mailmap(mailmap)
            .map_err(ingest_err)?;
        let author_id = store.add_person(
            author.name().unwrap_or(""),
            author.email().unwrap_or(""),
        )?;
        let committer_id = store.add_person(
            committer.name().unwrap_or(""),
            committer.email().unwrap_or(""),
        )?;

        let changes = changes::commit_changes(git_repo, git_commit)?;
        let commit_id = store.add_commit(&NewCommit {
            repository_id,
            rev: git_commit.id().to_string(),
            committer_id,
            author_id,
            date: git_commit.time().seconds(),
            message: git_commit.message().unwrap_or("").to_string(),
            composed_rev: false,
        })?;

        if let Err(e) = Self::record_changes(&changes, commit_id, tree, store) {
            // Leave no commit row behind, or reruns would skip it for good.
            store.discard_commit(commit_id)?;
            return Err(e);
        }
        Ok(changes.len())
    }

    fn record_changes(
        changes: &[Change],
        commit_id: i64,
        tree: &mut LiveTree,
        store: &dyn Store,
    ) -> Result<()> {
        for change in changes {
            match change {
                Change::Added(path) => {
                    let file_id = tree.add(store, path, commit_id)?;
                    store.add_action(ActionType::Added, file_id, commit_id)?;
                }
                Change::Modified(path) => {
                    let (action, file_id) = match tree.ids.get(path.as_str()) {
                        Some(&id) => (ActionType::Modified, id),
                        // Unknown to the live map: history was imported from a
                        // different tip. Start tracking it here.
                        None => (ActionType::Added, tree.add(store, path, commit_id)?),
                    };
                    store.add_action(action, file_id, commit_id)?;
                }
                Change::Deleted(path) => match tree.ids.remove(path.as_str()) {
                    Some(file_id) => store.add_action(ActionType::Deleted, file_id, commit_id)?,
                    None => warn!(path = %path, commit_id, "deleted path was never added"),
                },
            }
        }
        Ok(())
    }
}

impl Default for GitImporter {
    fn default() -> Self {
        GitImporter::new()
    }
}

impl Importer for GitImporter {
    fn import(&self, path: &Path, name: Option<&str>, store: &dyn Store) -> Result<ImportSummary> {
        let git_repo = git2::Repository::discover(path).map_err(ingest_err)?;
        let workdir = git_repo
            .workdir()
            .ok_or_else(|| {
                BlamemuxError::Unsupported(format!("{} is a bare repository", path.display()))
            })?
            .canonicalize()?;
        let uri = workdir.to_string_lossy().into_owned();
        let name = match name {
            Some(n) => n.to_string(),
            None => workdir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| uri.clone()),
        };

        let repository_id = match store.repository_id(&uri)? {
            Some(id) => id,
            None => store.add_repository(&uri, &name, &RepoKind::Git)?,
        };
        let mut summary = ImportSummary {
            repo_uri: uri.clone(),
            ..ImportSummary::default()
        };

        // An unborn HEAD has no history yet.
        let tip = match git_repo.head() {
            Ok(head) => head.peel_to_commit().map_err(ingest_err)?,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => return Ok(summary),
            Err(e) => return Err(ingest_err(e)),
        };

        let mailmap = git_repo.mailmap().map_err(ingest_err)?;
        let mut tree = LiveTree::load(store, repository_id)?;
        let mut revwalk = git_repo.revwalk().map_err(ingest_err)?;
        revwalk.push(tip.id()).map_err(ingest_err)?;
        revwalk
            .set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)
            .map_err(ingest_err)?;

        for oid_result in revwalk {
            let oid = match oid_result {
                Ok(oid) => oid,
                Err(e) => {
                    summary
                        .errors
                        .push(format!("Failed to get oid in revwalk: {}", e.message()));
                    continue;
                }
            };
            let sha = oid.to_string();
            if store.commit_exists(repository_id, &sha)? {
                summary.commits_already_present += 1;
                continue;
            }

            let git_commit = match git_repo.find_commit(oid) {
                Ok(c) => c,
                Err(e) => {
                    summary
                        .errors
                        .push(format!("Failed to find commit {}: {}", sha, e.message()));
                    continue;
                }
            };

            match self.import_commit(&git_repo, &git_commit, &mailmap, repository_id, &mut tree, store) {
                Ok(actions) => {
                    debug!(rev = %sha, actions, "imported commit");
                    summary.commits_imported += 1;
                    summary.actions_recorded += actions;
                }
                Err(e) => {
                    summary
                        .errors
                        .push(format!("Failed to import commit {}: {}", sha, e));
                    // The live map may hold ids of rows that were discarded.
                    tree = LiveTree::load(store, repository_id)?;
                }
            }
        }

        info!(
            repo = %summary.repo_uri,
            imported = summary.commits_imported,
            already_present = summary.commits_already_present,
            errors = summary.errors.len(),
            "history import finished"
        );
        Ok(summary)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingActions;
    use blamemux_store::SqliteStore;
    use std::path::Path;

    fn commit(
        repo: &git2::Repository,
        author: &str,
        files: &[(&str, Option<&str>)],
        message: &str,
    ) -> git2::Oid {
        let workdir = repo.workdir().expect("workdir").to_path_buf();
        let mut index = repo.index().expect("index");
        for (path, content) in files {
            let full = workdir.join(path);
            match content {
                Some(text) => {
                    if let Some(parent) = full.parent() {
                        std::fs::create_dir_all(parent).expect("mkdir");
                    }
                    std::fs::write(&full, text).expect("write");
                    index.add_path(Path::new(path)).expect("add");
                }
                None => {
                    std::fs::remove_file(&full).expect("rm");
                    index.remove_path(Path::new(path)).expect("remove");
                }
            }
        }
        index.write().expect("write index");
        let tree = repo
            .find_tree(index.write_tree().expect("write tree"))
            .expect("tree");
        let sig = git2::Signature::now(author, &format!("{}@example.com", author)).expect("sig");
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .expect("commit")
    }

    #[test]
    fn test_import_records_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("init");
        commit(&repo, "alice", &[("src/a.c", Some("a\n")), ("README", Some("r\n"))], "init");
        commit(&repo, "bob", &[("src/a.c", Some("a\nb\n")), ("README", None)], "edit");

        let store = SqliteStore::open_in_memory().expect("store");
        let summary = GitImporter::new()
            .import(dir.path(), Some("demo"), &store)
            .expect("import");
        assert_eq!(summary.commits_imported, 2);
        assert_eq!(summary.actions_recorded, 4);
        assert!(summary.errors.is_empty(), "{:?}", summary.errors);

        let repos = store.list_repositories().expect("repos");
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "demo");
        assert_eq!(repos[0].kind, RepoKind::Git);
        assert_eq!(
            repos[0].uri,
            dir.path().canonicalize().expect("canonical").to_string_lossy()
        );

        let live: Vec<String> = store
            .current_paths(repos[0].id)
            .expect("paths")
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert!(live.contains(&"src/a.c".to_string()));
        assert!(!live.contains(&"README".to_string()));

        let authors = store.authors().expect("authors");
        assert!(authors.get("alice").is_some());
        assert!(authors.get("bob").is_some());
    }

    #[test]
    fn test_incremental_import_skips_known_commits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("init");
        commit(&repo, "alice", &[("a.c", Some("1\n"))], "one");

        let store = SqliteStore::open_in_memory().expect("store");
        let importer = GitImporter::new();
        importer.import(dir.path(), None, &store).expect("first import");

        commit(&repo, "alice", &[("a.c", Some("1\n2\n")), ("lib/b.c", Some("b\n"))], "two");
        let summary = importer.import(dir.path(), None, &store).expect("second import");
        assert_eq!(summary.commits_already_present, 1);
        assert_eq!(summary.commits_imported, 1);

        let repo_id = store.list_repositories().expect("repos")[0].id;
        let revisions = store.file_revisions(repo_id, None, 100).expect("revisions");
        let modified = revisions
            .iter()
            .filter(|r| r.action == ActionType::Modified)
            .count();
        assert_eq!(modified, 1, "a.c must keep its file id across imports");
        let b = revisions.last().expect("revision");
        assert_eq!(store.file_path(b.file_id, b.commit_id).expect("path"), "lib/b.c");
    }

    #[test]
    fn test_people_are_recorded_through_the_mailmap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("init");
        commit(
            &repo,
            "alice",
            &[(".mailmap", Some("Alice Real <alice@example.com>\n")), ("a.c", Some("a\n"))],
            "init",
        );
        commit(&repo, "bob", &[("a.c", Some("a\nb\n"))], "edit");

        let store = SqliteStore::open_in_memory().expect("store");
        let summary = GitImporter::new()
            .import(dir.path(), None, &store)
            .expect("import");
        assert!(summary.errors.is_empty(), "{:?}", summary.errors);

        let authors = store.authors().expect("authors");
        assert!(authors.get("Alice Real").is_some());
        assert!(authors.get("alice").is_none());
        assert!(authors.get("bob").is_some());
    }

    #[test]
    fn test_failed_commit_is_retried_on_next_import() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("init");
        commit(&repo, "alice", &[("a.c", Some("1\n"))], "one");
        // Recorded as M a.c then A b.c; the third action fails.
        commit(&repo, "alice", &[("a.c", Some("1\n2\n")), ("b.c", Some("b\n"))], "two");

        let store = FailingActions::new(SqliteStore::open_in_memory().expect("store"), 3);
        let importer = GitImporter::new();
        let first = importer.import(dir.path(), None, &store).expect("first import");
        assert_eq!(first.commits_imported, 1);
        assert_eq!(first.errors.len(), 1);

        let repo_id = store.list_repositories().expect("repos")[0].id;
        let live: Vec<String> = store
            .current_paths(repo_id)
            .expect("paths")
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(live, vec!["a.c".to_string()]);

        let second = importer.import(dir.path(), None, &store).expect("second import");
        assert_eq!(second.commits_already_present, 1);
        assert_eq!(second.commits_imported, 1);
        assert!(second.errors.is_empty(), "{:?}", second.errors);

        let live: Vec<String> = store
            .current_paths(repo_id)
            .expect("paths")
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(live, vec!["a.c".to_string(), "b.c".to_string()]);
        let revisions = store.file_revisions(repo_id, None, 100).expect("revisions");
        assert_eq!(revisions.len(), 3);
    }

    #[test]
    fn test_empty_repository_imports_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        git2::Repository::init(dir.path()).expect("init");
        let store = SqliteStore::open_in_memory().expect("store");
        let summary = GitImporter::new()
            .import(dir.path(), None, &store)
            .expect("import");
        assert_eq!(summary.commits_imported, 0);
        assert_eq!(store.list_repositories().expect("repos").len(), 1);
    }
}
