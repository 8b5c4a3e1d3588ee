//! Fixed-size worker pool with a bounded submission queue.

use blamemux_types::{BlamemuxError, Repository, Result};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::error;

/// A unit of work executed on a pool thread.
pub trait Job: Send + 'static {
    fn run(&mut self, repo: &dyn Repository, repo_root: &Path);
}

/// Count of pushed jobs that have not finished yet.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct JobPool<J: Job> {
    queue: Option<Sender<J>>,
    done: Receiver<J>,
    pending: Arc<Pending>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Job> JobPool<J> {
    /// Start `workers` threads sharing `repo`. At most `queue_size` jobs
    /// wait for a free worker before `push` blocks.
    pub fn new(repo: Arc<dyn Repository>, root: PathBuf, workers: usize, queue_size: usize) -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded::<J>(queue_size.max(1));
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<J>();
        let pending = Arc::new(Pending::default());

        let workers = (0..workers.max(1))
            .map(|_| {
                let queue_rx = queue_rx.clone();
                let done_tx = done_tx.clone();
                let pending = Arc::clone(&pending);
                let repo = Arc::clone(&repo);
                let root = root.clone();
                thread::spawn(move || {
                    for mut job in queue_rx.iter() {
                        let outcome =
                            panic::catch_unwind(AssertUnwindSafe(|| job.run(repo.as_ref(), &root)));
                        if outcome.is_err() {
                            error!("job panicked; reporting it as finished");
                        }
                        // Publish before decrementing so `join` never returns
                        // ahead of the result.
                        let _ = done_tx.send(job);
                        pending.finish();
                    }
                })
            })
            .collect();

        Self {
            queue: Some(queue_tx),
            done: done_rx,
            pending,
            workers,
        }
    }

    /// Submit a job, blocking while the queue is full.
    pub fn push(&self, job: J) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| BlamemuxError::Run("job pool is shut down".into()))?;
        self.pending.add();
        if queue.send(job).is_err() {
            self.pending.finish();
            return Err(BlamemuxError::Run("job pool workers have exited".into()));
        }
        Ok(())
    }

    /// Block until every pushed job has finished.
    pub fn join(&self) {
        self.pending.wait_idle();
    }

    /// Wait up to `timeout` for a finished job.
    pub fn get_next_done(&self, timeout: Duration) -> Option<J> {
        self.done.recv_timeout(timeout).ok()
    }

    /// A finished job if one is ready, without blocking.
    pub fn get_next_done_unlocked(&self) -> Option<J> {
        self.done.try_recv().ok()
    }
}

impl<J: Job> Drop for JobPool<J> {
    fn drop(&mut self) {
        self.queue.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
