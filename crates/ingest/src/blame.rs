//! The `Blame` stage: per-author line counts for every file revision.
//!
//! Jobs are pushed onto a [`JobPool`] in history order. Every `watermark`
//! submissions the scheduler joins the pool, drains the finished jobs and
//! writes their rows as one batch; a final join and drain flushes the rest.
//! Only this thread touches the id counter and the store.

use crate::blame_job::BlameJob;
use crate::file_revs::{PathRules, WorkEnumerator};
use crate::pool::JobPool;
use crate::target::resolve_target;
use blamemux_types::{
    AuthorIndex, BlameConfig, BlameJobDescriptor, BlameJobResult, BlameRecord, BlameSummary,
    BlamemuxError, Extension, ProcessedSet, Repository, Result, SchemaStatus, StageReport, Store,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// First wait for a finished job after a watermark join.
const DRAIN_WAIT: Duration = Duration::from_millis(500);

/// State threaded through one run, owned by the scheduler thread.
#[derive(Debug)]
pub struct RunContext {
    pub repository_id: i64,
    /// Id the next persisted row receives.
    pub next_id: i64,
    pub authors: AuthorIndex,
}

/// Convert a finished job into rows, advancing `ctx.next_id` past them.
///
/// Failed jobs produce nothing. An author missing from the index is an error
/// and leaves the counter untouched.
pub fn rows_for(result: &BlameJobResult, ctx: &mut RunContext) -> Result<Vec<BlameRecord>> {
    if result.failed {
        return Ok(Vec::new());
    }
    let resolved = result
        .author_line_counts
        .iter()
        .filter(|(_, n)| **n > 0)
        .map(|(name, &n)| {
            ctx.authors
                .get(name)
                .map(|author_id| (author_id, n))
                .ok_or_else(|| BlamemuxError::UnknownAuthor {
                    name: name.clone(),
                    file_id: result.file_id,
                    commit_id: result.commit_id,
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let rows: Vec<BlameRecord> = resolved
        .into_iter()
        .enumerate()
        .map(|(offset, (author_id, n_lines))| BlameRecord {
            id: ctx.next_id + offset as i64,
            file_id: result.file_id,
            commit_id: result.commit_id,
            author_id,
            n_lines,
        })
        .collect();
    ctx.next_id += rows.len() as i64;
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    /// After a watermark join: wait briefly for the first job.
    Watermark,
    /// End of run: take only what is already finished.
    Final,
}

/// Join the pool, convert every finished job and insert the rows as one batch.
fn process_finished_jobs(
    pool: &JobPool<BlameJob>,
    ctx: &mut RunContext,
    store: &dyn Store,
    summary: &mut BlameSummary,
    drain: Drain,
) -> Result<()> {
    pool.join();

    let mut rows = Vec::new();
    let mut wait = DRAIN_WAIT;
    loop {
        let job = match drain {
            Drain::Watermark => pool.get_next_done(wait),
            Drain::Final => pool.get_next_done_unlocked(),
        };
        let Some(job) = job else {
            break;
        };
        wait = Duration::ZERO;

        let result = job.into_result();
        if result.failed {
            summary.jobs_failed += 1;
            continue;
        }
        let converted = rows_for(&result, ctx).map_err(|e| {
            error!(error = %e, "cannot attribute blame rows");
            e
        })?;
        rows.extend(converted);
    }

    if rows.is_empty() {
        return Ok(());
    }
    store.insert_blame_batch(&rows)?;
    debug!(rows = rows.len(), next_id = ctx.next_id, "inserted blame batch");
    summary.rows_inserted += rows.len();
    summary.batches += 1;
    Ok(())
}

pub struct Blame {
    config: BlameConfig,
}

impl Blame {
    pub fn new(config: BlameConfig) -> Self {
        Self { config }
    }
}

impl Default for Blame {
    fn default() -> Self {
        Self::new(BlameConfig::default())
    }
}

impl Extension for Blame {
    fn name(&self) -> &'static str {
        "Blame"
    }

    fn deps(&self) -> &'static [&'static str] {
        &["FileTypes"]
    }

    fn run(&self, repo: Arc<dyn Repository>, uri: &str, store: &dyn Store) -> Result<StageReport> {
        self.config.validate()?;
        let target = resolve_target(repo.as_ref(), uri, store)?;
        info!(repo = %target.repo_uri, workers = self.config.workers, "blame run starting");

        let status = store
            .create_blame_table()
            .map_err(|e| BlamemuxError::Run(format!("cannot create blame table: {}", e)))?;
        let next_id = match status {
            SchemaStatus::Created => 1,
            SchemaStatus::AlreadyExists => store.next_blame_id()?,
        };
        let processed = if next_id > 1 {
            store.processed_pairs(target.repository_id)?
        } else {
            ProcessedSet::default()
        };
        let eligible = store.code_files(target.repository_id)?;
        let rules = PathRules::new(repo.as_ref(), &target.local_root)?;
        let mut ctx = RunContext {
            repository_id: target.repository_id,
            next_id,
            authors: store.authors()?,
        };
        debug!(
            next_id,
            processed = processed.len(),
            eligible = eligible.len(),
            authors = ctx.authors.len(),
            "run context loaded"
        );

        let mut summary = BlameSummary {
            repo_uri: target.repo_uri.clone(),
            ..BlameSummary::default()
        };
        let pool = JobPool::new(
            Arc::clone(&repo),
            target.local_root.clone(),
            self.config.workers,
            self.config.queue_size,
        );
        let mut enumerator =
            WorkEnumerator::new(store, ctx.repository_id, &eligible, &processed, &rules);

        let mut since_drain = 0;
        while let Some(entry) = enumerator.next() {
            let entry = entry?;
            let descriptor = BlameJobDescriptor {
                file_id: entry.file_id,
                commit_id: entry.commit_id,
                revision: entry.revision().to_string(),
                path: entry.path,
            };
            pool.push(BlameJob::new(descriptor, self.config.job_timeout))?;
            summary.jobs_submitted += 1;
            since_drain += 1;

            if since_drain >= self.config.watermark {
                process_finished_jobs(&pool, &mut ctx, store, &mut summary, Drain::Watermark)?;
                since_drain = 0;
            }
        }
        process_finished_jobs(&pool, &mut ctx, store, &mut summary, Drain::Final)?;

        summary.already_processed = enumerator.already_processed;
        summary.skipped = enumerator.skipped;
        info!(
            repo = %summary.repo_uri,
            jobs = summary.jobs_submitted,
            failed = summary.jobs_failed,
            rows = summary.rows_inserted,
            "blame run finished"
        );
        Ok(StageReport::Blame(summary))
    }

    fn backout(&self, repo: Arc<dyn Repository>, uri: &str, store: &dyn Store) -> Result<usize> {
        let target = resolve_target(repo.as_ref(), uri, store)?;
        let removed = store.backout_blame(target.repository_id)?;
        info!(repo = %target.repo_uri, removed, "blame rows backed out");
        Ok(removed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
