use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BlamemuxError {
    #[cfg(feature = "rusqlite-errors")]
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("ingest error: {0}")]
    Ingest(String),
    #[cfg(feature = "git2-errors")]
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The repository backend cannot map a local path to a repository URI.
    #[error("unsupported repository: {0}")]
    Unsupported(String),
    /// Setup failure of a stage run (repository lookup, schema creation, ...).
    #[error("run error: {0}")]
    Run(String),
    /// An author named in blame output has no `people` row.
    #[error("unknown author '{name}' while processing file {file_id} @ commit {commit_id}")]
    UnknownAuthor {
        name: String,
        file_id: i64,
        commit_id: i64,
    },
    #[error("dependency error: {0}")]
    Dependency(String),
}

pub type Result<T> = std::result::Result<T, BlamemuxError>;

/// Failure of a single VCS command invocation. Never fatal to a run.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command `{cmd}` returned {code} ({stderr})")]
    Failed {
        cmd: String,
        code: i32,
        stderr: String,
    },
    #[error("command `{cmd}` could not be run: {source}")]
    Io {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command `{cmd}` timed out after {after:?}")]
    Timeout { cmd: String, after: Duration },
}

// ── Repository kinds ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoKind {
    Git,
    Svn,
    Cvs,
    Other(String),
}

impl RepoKind {
    pub fn as_str(&self) -> &str {
        match self {
            RepoKind::Git => "git",
            RepoKind::Svn => "svn",
            RepoKind::Cvs => "cvs",
            RepoKind::Other(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "git" => RepoKind::Git,
            "svn" => RepoKind::Svn,
            "cvs" => RepoKind::Cvs,
            other => RepoKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for RepoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── History model ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub id: i64,
    pub uri: String,
    pub name: String,
    pub kind: RepoKind,
}

#[derive(Debug, Clone)]
pub struct NewCommit {
    pub repository_id: i64,
    pub rev: String,
    pub committer_id: i64,
    pub author_id: i64,
    pub date: i64,
    pub message: String,
    pub composed_rev: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Added,
    Modified,
    Deleted,
    Copied,
    Replaced,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Added => "A",
            ActionType::Modified => "M",
            ActionType::Deleted => "D",
            ActionType::Copied => "C",
            ActionType::Replaced => "R",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(ActionType::Added),
            "M" => Some(ActionType::Modified),
            "D" => Some(ActionType::Deleted),
            "C" => Some(ActionType::Copied),
            "R" => Some(ActionType::Replaced),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the history iterator: a file touched by a commit.
#[derive(Debug, Clone)]
pub struct FileRevision {
    pub action_id: i64,
    pub commit_id: i64,
    pub file_id: i64,
    pub revision: String,
    pub action: ActionType,
    pub composed: bool,
    pub date: i64,
}

impl FileRevision {
    pub fn cursor(&self) -> RevisionCursor {
        RevisionCursor {
            date: self.date,
            commit_id: self.commit_id,
            action_id: self.action_id,
        }
    }
}

/// Keyset position in the history ordering (date, commit id, action id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionCursor {
    pub date: i64,
    pub commit_id: i64,
    pub action_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Code,
    Build,
    Ui,
    I18n,
    Documentation,
    Image,
    Multimedia,
    Package,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Code => "code",
            FileType::Build => "build",
            FileType::Ui => "ui",
            FileType::I18n => "i18n",
            FileType::Documentation => "documentation",
            FileType::Image => "image",
            FileType::Multimedia => "multimedia",
            FileType::Package => "package",
            FileType::Unknown => "unknown",
        }
    }

    /// Types whose files are worth blaming.
    pub fn is_code_bearing(&self) -> bool {
        matches!(self, FileType::Code | FileType::Unknown)
    }
}

// ── Blame pipeline types ──────────────────────────────────────────────────

/// One historical state of one file, as produced by the work enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionEntry {
    pub file_id: i64,
    pub commit_id: i64,
    pub path: String,
    pub revision_label: String,
    pub is_composed: bool,
}

impl RevisionEntry {
    /// The concrete revision to blame: the first segment of a composed label.
    pub fn revision(&self) -> &str {
        if self.is_composed {
            self.revision_label
                .split(COMPOSED_REVISION_DELIMITER)
                .next()
                .unwrap_or(&self.revision_label)
        } else {
            &self.revision_label
        }
    }
}

pub const COMPOSED_REVISION_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameJobDescriptor {
    pub file_id: i64,
    pub commit_id: i64,
    pub path: String,
    pub revision: String,
}

#[derive(Debug, Clone, Default)]
pub struct BlameJobResult {
    pub file_id: i64,
    pub commit_id: i64,
    pub author_line_counts: BTreeMap<String, u32>,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameRecord {
    pub id: i64,
    pub file_id: i64,
    pub commit_id: i64,
    pub author_id: i64,
    pub n_lines: u32,
}

/// Author display name to `people.id`.
#[derive(Debug, Clone, Default)]
pub struct AuthorIndex {
    ids: HashMap<String, i64>,
}

impl AuthorIndex {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.ids.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<(String, i64)> for AuthorIndex {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// (file_id, commit_id) pairs that already have blame rows.
#[derive(Debug, Clone, Default)]
pub struct ProcessedSet {
    pairs: HashSet<(i64, i64)>,
}

impl ProcessedSet {
    pub fn contains(&self, file_id: i64, commit_id: i64) -> bool {
        self.pairs.contains(&(file_id, commit_id))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromIterator<(i64, i64)> for ProcessedSet {
    fn from_iter<I: IntoIterator<Item = (i64, i64)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    Created,
    AlreadyExists,
}

// ── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BlameConfig {
    /// Jobs submitted between two blocking drains.
    pub watermark: usize,
    /// Capacity of the job pool's submission queue.
    pub queue_size: usize,
    pub workers: usize,
    /// Per-job limit on the blame command; `None` waits forever.
    pub job_timeout: Option<Duration>,
}

impl Default for BlameConfig {
    fn default() -> Self {
        Self {
            watermark: 10,
            queue_size: 100,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            job_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl BlameConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watermark == 0 {
            return Err(BlamemuxError::Config("watermark must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(BlamemuxError::Config("workers must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(BlamemuxError::Config("queue size must be at least 1".into()));
        }
        Ok(())
    }
}

// ── Summaries ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct ImportSummary {
    pub repo_uri: String,
    pub commits_imported: usize,
    pub commits_already_present: usize,
    pub actions_recorded: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct FileTypesSummary {
    pub files_classified: usize,
    pub code_files: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct BlameSummary {
    pub repo_uri: String,
    pub jobs_submitted: usize,
    pub jobs_failed: usize,
    pub already_processed: usize,
    pub skipped: usize,
    pub rows_inserted: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageReport {
    FileTypes(FileTypesSummary),
    Blame(BlameSummary),
}

// ── Admin types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct RepoStats {
    pub uri: String,
    pub kind: String,
    pub commit_count: usize,
    pub classified_files: usize,
    pub blame_rows: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthorLines {
    pub author: String,
    pub n_lines: u32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Ownership {
    pub file_id: i64,
    pub commit_id: i64,
    pub rev: String,
    pub authors: Vec<AuthorLines>,
}

// ── Core traits ───────────────────────────────────────────────────────────

pub trait Store: Send + Sync {
    // Repositories
    fn add_repository(&self, uri: &str, name: &str, kind: &RepoKind) -> Result<i64>;
    fn repository_id(&self, uri: &str) -> Result<Option<i64>>;
    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>>;

    // History writes
    fn add_person(&self, name: &str, email: &str) -> Result<i64>;
    fn commit_exists(&self, repository_id: i64, rev: &str) -> Result<bool>;
    fn add_commit(&self, commit: &NewCommit) -> Result<i64>;
    fn add_file(&self, repository_id: i64, file_name: &str) -> Result<i64>;
    /// `parent_id` of -1 links the file to the repository root.
    fn add_file_link(&self, parent_id: i64, file_id: i64, commit_id: i64) -> Result<()>;
    fn add_action(&self, action: ActionType, file_id: i64, commit_id: i64) -> Result<()>;
    /// Remove a partially recorded commit: its actions, its file links, the
    /// files left without any link, and the commit row itself.
    fn discard_commit(&self, commit_id: i64) -> Result<()>;
    /// Live (not deleted) paths of the repository with their file ids.
    fn current_paths(&self, repository_id: i64) -> Result<Vec<(String, i64)>>;

    // History reads
    fn file_revisions(
        &self,
        repository_id: i64,
        after: Option<RevisionCursor>,
        limit: usize,
    ) -> Result<Vec<FileRevision>>;
    /// Path of `file_id` as of `commit_id`, relative to the repository root.
    fn file_path(&self, file_id: i64, commit_id: i64) -> Result<String>;
    fn authors(&self) -> Result<AuthorIndex>;

    // FileTypes stage
    fn create_file_types_table(&self) -> Result<SchemaStatus>;
    fn unclassified_files(&self, repository_id: i64) -> Result<Vec<(i64, String)>>;
    fn insert_file_types(&self, rows: &[(i64, FileType)]) -> Result<()>;
    fn backout_file_types(&self, repository_id: i64) -> Result<usize>;
    fn code_files(&self, repository_id: i64) -> Result<HashSet<i64>>;

    // Blame stage
    fn create_blame_table(&self) -> Result<SchemaStatus>;
    /// `max(id) + 1` over existing blame rows, or 1.
    fn next_blame_id(&self) -> Result<i64>;
    fn processed_pairs(&self, repository_id: i64) -> Result<ProcessedSet>;
    /// All-or-nothing insert of one drained batch.
    fn insert_blame_batch(&self, rows: &[BlameRecord]) -> Result<()>;
    fn backout_blame(&self, repository_id: i64) -> Result<usize>;

    // Admin
    fn repo_stats(&self, repository_id: i64) -> Result<RepoStats>;
    fn owners(&self, file_id: i64) -> Result<Option<Ownership>>;
}

/// A version-control working copy that can annotate files.
pub trait Repository: Send + Sync {
    fn kind(&self) -> RepoKind;

    /// URI of the repository root.
    fn uri(&self) -> &str;

    /// URI of the repository location checked out at `path`.
    fn uri_for_path(&self, path: &Path) -> Result<String> {
        Err(BlamemuxError::Unsupported(format!(
            "cannot resolve {} for {} repositories",
            path.display(),
            self.kind()
        )))
    }

    /// Directory that stored file paths are relative to, for a checkout
    /// containing `path`.
    fn checkout_root(&self, path: &Path) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }

    /// Whether `blame` accepts repository URLs in place of local paths.
    fn blames_remote(&self) -> bool {
        false
    }

    /// Annotate `path` at `revision`, handing every raw output line to `sink`
    /// before returning.
    fn blame(
        &self,
        path: &Path,
        revision: &str,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(&str),
    ) -> std::result::Result<(), CommandError>;
}

/// Imports version-control history into the history tables.
pub trait Importer: Send + Sync {
    fn import(&self, path: &Path, name: Option<&str>, store: &dyn Store) -> Result<ImportSummary>;
}

/// A named analysis stage run over an imported repository.
pub trait Extension: Send + Sync {
    fn name(&self) -> &'static str;

    fn deps(&self) -> &'static [&'static str] {
        &[]
    }

    fn run(&self, repo: Arc<dyn Repository>, uri: &str, store: &dyn Store) -> Result<StageReport>;

    /// Remove everything this stage persisted for the repository.
    fn backout(&self, repo: Arc<dyn Repository>, uri: &str, store: &dyn Store) -> Result<usize>;
}

// ── Tests ─────────────────────────────────────────────────────────────────
