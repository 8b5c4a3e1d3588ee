use crate::parser::{create_parser, BlameLine, OutputDevice};
use crate::pool::Job;
use blamemux_types::{BlameJobDescriptor, BlameJobResult, Repository};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Counts attributed lines per author.
#[derive(Debug, Default)]
pub struct BlameContentHandler {
    counts: BTreeMap<String, u32>,
}

impl BlameContentHandler {
    pub fn into_counts(self) -> BTreeMap<String, u32> {
        self.counts
    }
}

impl OutputDevice for BlameContentHandler {
    fn line(&mut self, line: &BlameLine) {
        *self.counts.entry(line.author.clone()).or_insert(0) += 1;
    }
}

/// Blame one file revision. Command failures are logged and reported through
/// `failed`; they never escape.
pub fn execute(
    descriptor: &BlameJobDescriptor,
    repo: &dyn Repository,
    repo_root: &Path,
    timeout: Option<Duration>,
) -> BlameJobResult {
    let mut result = BlameJobResult {
        file_id: descriptor.file_id,
        commit_id: descriptor.commit_id,
        ..BlameJobResult::default()
    };

    let Some(mut parser) = create_parser(&repo.kind(), &descriptor.path) else {
        warn!(
            path = %descriptor.path,
            revision = %descriptor.revision,
            kind = %repo.kind(),
            "no blame parser for repository kind"
        );
        result.failed = true;
        return result;
    };

    let mut handler = BlameContentHandler::default();
    let full_path = repo_root.join(&descriptor.path);
    let outcome = repo.blame(&full_path, &descriptor.revision, timeout, &mut |raw: &str| {
        parser.feed(raw, &mut handler)
    });
    parser.end(&mut handler);

    match outcome {
        Ok(()) => result.author_line_counts = handler.into_counts(),
        Err(e) => {
            warn!(
                path = %descriptor.path,
                revision = %descriptor.revision,
                file_id = descriptor.file_id,
                commit_id = descriptor.commit_id,
                error = %e,
                "blame failed"
            );
            result.failed = true;
        }
    }
    result
}

/// Pool job wrapping [`execute`].
pub struct BlameJob {
    descriptor: BlameJobDescriptor,
    timeout: Option<Duration>,
    result: Option<BlameJobResult>,
}

impl BlameJob {
    pub fn new(descriptor: BlameJobDescriptor, timeout: Option<Duration>) -> Self {
        Self {
            descriptor,
            timeout,
            result: None,
        }
    }

    /// The job's outcome. A job that never completed counts as failed.
    pub fn into_result(self) -> BlameJobResult {
        let descriptor = self.descriptor;
        self.result.unwrap_or_else(|| BlameJobResult {
            file_id: descriptor.file_id,
            commit_id: descriptor.commit_id,
            failed: true,
            ..BlameJobResult::default()
        })
    }
}

impl Job for BlameJob {
    fn run(&mut self, repo: &dyn Repository, repo_root: &Path) {
        self.result = Some(execute(&self.descriptor, repo, repo_root, self.timeout));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
