pub mod backends;
mod blame;
mod blame_job;
mod changes;
mod file_revs;
mod file_types;
pub mod parser;
mod pool;
mod registry;
mod target;
mod walker;

#[cfg(test)]
mod testing;

pub use backends::{detect, run_streaming, uri_to_filename, CvsRepository, GitRepository, SvnRepository};
pub use blame::{rows_for, Blame, RunContext};
pub use blame_job::{execute, BlameContentHandler, BlameJob};
pub use changes::{commit_changes, Change};
pub use file_revs::{FileRevs, PathRules, WorkEnumerator};
pub use file_types::{classify, FileTypes};
pub use pool::{Job, JobPool};
pub use registry::Registry;
pub use target::{resolve_target, RunTarget};
pub use walker::GitImporter;
