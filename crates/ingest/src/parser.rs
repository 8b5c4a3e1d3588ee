//! Parsers for the annotate output of each supported VCS.
//!
//! A parser is fed raw output one line at a time and reports every attributed
//! source line to an [`OutputDevice`]. `end()` must be called exactly once
//! after the blame command returns, whether or not it succeeded.

use blamemux_types::RepoKind;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

static SVN_LINE: OnceLock<Regex> = OnceLock::new();
static CVS_LINE: OnceLock<Regex> = OnceLock::new();
static GIT_HEADER: OnceLock<Regex> = OnceLock::new();

fn svn_line() -> &'static Regex {
    SVN_LINE.get_or_init(|| Regex::new(r"^\s*(\d+|-)\s+(\S+)(?: (.*))?$").expect("valid regex"))
}

fn cvs_line() -> &'static Regex {
    CVS_LINE.get_or_init(|| {
        Regex::new(r"^([0-9.]+)\s+\((\S+)\s+\d{2}-\w{3}-\d{2}\):(?: ?(.*))?$")
            .expect("valid regex")
    })
}

fn git_header() -> &'static Regex {
    GIT_HEADER.get_or_init(|| {
        Regex::new(r"^([0-9a-f]{40}) \d+ (\d+)(?: \d+)?$").expect("valid regex")
    })
}

/// One source line attributed to an author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameLine {
    pub author: String,
    pub revision: String,
    /// 1-indexed line number in the annotated revision.
    pub line_number: usize,
}

/// Receives parsed blame events.
pub trait OutputDevice {
    fn start_file(&mut self, _filename: &str) {}
    fn line(&mut self, line: &BlameLine);
    fn end_file(&mut self) {}
}

pub trait BlameParser: Send {
    fn feed(&mut self, raw: &str, out: &mut dyn OutputDevice);

    /// Signal end of stream. Safe to call more than once.
    fn end(&mut self, out: &mut dyn OutputDevice);
}

/// Returns `None` for repository kinds without a known annotate format.
pub fn create_parser(kind: &RepoKind, filename: &str) -> Option<Box<dyn BlameParser>> {
    let parser: Box<dyn BlameParser> = match kind {
        RepoKind::Git => Box::new(GitPorcelainParser::new(filename)),
        RepoKind::Svn => Box::new(SvnBlameParser::new(filename)),
        RepoKind::Cvs => Box::new(CvsAnnotateParser::new(filename)),
        RepoKind::Other(_) => return None,
    };
    Some(parser)
}

/// Tracks start/end of the single file a parser annotates.
#[derive(Debug)]
struct FileFraming {
    filename: String,
    started: bool,
    finished: bool,
}

impl FileFraming {
    fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            started: false,
            finished: false,
        }
    }

    fn ensure_started(&mut self, out: &mut dyn OutputDevice) {
        if !self.started {
            self.started = true;
            out.start_file(&self.filename);
        }
    }

    fn finish(&mut self, out: &mut dyn OutputDevice) {
        if self.started && !self.finished {
            self.finished = true;
            out.end_file();
        }
    }
}

// ── git blame --line-porcelain ────────────────────────────────────────────

pub struct GitPorcelainParser {
    framing: FileFraming,
    commit: Option<String>,
    line_number: usize,
    authors: HashMap<String, String>,
}

impl GitPorcelainParser {
    pub fn new(filename: &str) -> Self {
        Self {
            framing: FileFraming::new(filename),
            commit: None,
            line_number: 0,
            authors: HashMap::new(),
        }
    }
}

impl BlameParser for GitPorcelainParser {
    fn feed(&mut self, raw: &str, out: &mut dyn OutputDevice) {
        if raw.starts_with('\t') {
            // Content line: closes the current entry.
            let Some(commit) = self.commit.as_ref() else {
                return;
            };
            let author = self.authors.get(commit).cloned().unwrap_or_default();
            self.framing.ensure_started(out);
            out.line(&BlameLine {
                author,
                revision: commit.clone(),
                line_number: self.line_number,
            });
            return;
        }

        if let Some(author) = raw.strip_prefix("author ") {
            if let Some(commit) = self.commit.as_ref() {
                self.authors.insert(commit.clone(), author.to_string());
            }
            return;
        }

        if let Some(caps) = git_header().captures(raw) {
            self.commit = Some(caps[1].to_string());
            self.line_number = caps[2].parse().unwrap_or(0);
        }
    }

    fn end(&mut self, out: &mut dyn OutputDevice) {
        self.framing.finish(out);
    }
}

// ── svn blame ─────────────────────────────────────────────────────────────

pub struct SvnBlameParser {
    framing: FileFraming,
    line_number: usize,
}

impl SvnBlameParser {
    pub fn new(filename: &str) -> Self {
        Self {
            framing: FileFraming::new(filename),
            line_number: 0,
        }
    }
}

impl BlameParser for SvnBlameParser {
    fn feed(&mut self, raw: &str, out: &mut dyn OutputDevice) {
        let Some(caps) = svn_line().captures(raw) else {
            return;
        };
        self.line_number += 1;
        self.framing.ensure_started(out);
        out.line(&BlameLine {
            author: caps[2].to_string(),
            revision: caps[1].to_string(),
            line_number: self.line_number,
        });
    }

    fn end(&mut self, out: &mut dyn OutputDevice) {
        self.framing.finish(out);
    }
}

// ── cvs annotate ──────────────────────────────────────────────────────────

pub struct CvsAnnotateParser {
    framing: FileFraming,
    line_number: usize,
}

impl CvsAnnotateParser {
    pub fn new(filename: &str) -> Self {
        Self {
            framing: FileFraming::new(filename),
            line_number: 0,
        }
    }
}

impl BlameParser for CvsAnnotateParser {
    fn feed(&mut self, raw: &str, out: &mut dyn OutputDevice) {
        let Some(caps) = cvs_line().captures(raw) else {
            return;
        };
        self.line_number += 1;
        self.framing.ensure_started(out);
        out.line(&BlameLine {
            author: caps[2].to_string(),
            revision: caps[1].to_string(),
            line_number: self.line_number,
        });
    }

    fn end(&mut self, out: &mut dyn OutputDevice) {
        self.framing.finish(out);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
