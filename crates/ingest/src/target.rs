use crate::backends::uri_to_filename;
use blamemux_types::{BlamemuxError, Repository, Result, Store};
use std::path::{Path, PathBuf};

/// Where a stage run operates: the stored repository and the root that
/// stored paths are blamed relative to.
#[derive(Debug, Clone)]
pub struct RunTarget {
    pub repo_uri: String,
    /// A local checkout directory, or the repository URL for remote runs.
    pub local_root: PathBuf,
    pub repository_id: i64,
}

/// Resolve `uri` to the repository row it was imported as. `uri` is either a
/// local checkout path or, for backends that blame by URL, the repository URL
/// itself. Failures here abort the run.
pub fn resolve_target(repo: &dyn Repository, uri: &str, store: &dyn Store) -> Result<RunTarget> {
    let (repo_uri, local_root) = match uri_to_filename(uri) {
        Some(path) => local_target(repo, &path)?,
        None if uri.contains("://") && repo.blames_remote() => {
            (uri.to_string(), PathBuf::from(repo.uri()))
        }
        None => {
            return Err(BlamemuxError::Run(format!(
                "{} is not a local working copy",
                uri
            )))
        }
    };

    let repository_id = store
        .repository_id(&repo_uri)
        .map_err(|e| BlamemuxError::Run(format!("repository lookup failed: {}", e)))?
        .ok_or_else(|| {
            BlamemuxError::Run(format!(
                "repository {} has not been imported; run `blamemux ingest` first",
                repo_uri
            ))
        })?;

    Ok(RunTarget {
        repo_uri,
        local_root,
        repository_id,
    })
}

fn local_target(repo: &dyn Repository, path: &Path) -> Result<(String, PathBuf)> {
    let path = path
        .canonicalize()
        .map_err(|e| BlamemuxError::Run(format!("cannot resolve {}: {}", path.display(), e)))?;

    let repo_uri = repo.uri_for_path(&path).map_err(|e| match e {
        BlamemuxError::Unsupported(_) => BlamemuxError::Unsupported(format!(
            "repository type {} is not supported by this stage",
            repo.kind()
        )),
        other => BlamemuxError::Run(format!(
            "cannot determine repository uri for {}: {}",
            path.display(),
            other
        )),
    })?;
    // A subdirectory of a checkout still blames from the checkout root.
    let local_root = repo.checkout_root(&path).map_err(|e| {
        BlamemuxError::Run(format!("cannot find checkout root of {}: {}", path.display(), e))
    })?;
    Ok((repo_uri, local_root))
}
