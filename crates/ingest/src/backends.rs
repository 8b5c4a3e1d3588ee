//! Command-line backed [`Repository`] implementations.

use blamemux_types::{BlamemuxError, CommandError, RepoKind, Repository, Result};
use crossbeam_channel::RecvTimeoutError;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Lines buffered between the stdout reader thread and the sink.
const LINE_BUFFER: usize = 1024;

fn describe(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Wait for `child`, killing it once `deadline` passes.
fn wait_until(
    child: &mut Child,
    deadline: Option<Instant>,
    cmd: &str,
    timeout: Option<Duration>,
) -> std::result::Result<ExitStatus, CommandError> {
    let io_err = |source| CommandError::Io {
        cmd: cmd.to_string(),
        source,
    };
    let Some(deadline) = deadline else {
        return child.wait().map_err(io_err);
    };
    loop {
        if let Some(status) = child.try_wait().map_err(io_err)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::Timeout {
                cmd: cmd.to_string(),
                after: timeout.unwrap_or_default(),
            });
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Run `command`, handing each stdout line to `sink` as it arrives.
///
/// A non-zero exit becomes [`CommandError::Failed`] carrying stderr. When
/// `timeout` elapses first the process is killed and
/// [`CommandError::Timeout`] is returned.
pub fn run_streaming(
    mut command: Command,
    timeout: Option<Duration>,
    sink: &mut dyn FnMut(&str),
) -> std::result::Result<(), CommandError> {
    let cmd = describe(&command);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(|source| CommandError::Io {
        cmd: cmd.clone(),
        source,
    })?;
    let deadline = timeout.map(|t| Instant::now() + t);

    let stdout = child.stdout.take();
    let (line_tx, line_rx) = crossbeam_channel::bounded::<String>(LINE_BUFFER);
    let reader = thread::spawn(move || {
        let Some(stdout) = stdout else {
            return;
        };
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let stderr = child.stderr.take();
    let stderr_reader = thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut text);
        }
        text
    });

    loop {
        let next = match deadline {
            Some(deadline) => line_rx.recv_deadline(deadline),
            None => line_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(line) => sink(line.as_str()),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let _ = child.kill();
                let _ = child.wait();
                // The reader threads exit once the pipes close; not joined in
                // case a grandchild still holds them open.
                return Err(CommandError::Timeout {
                    cmd,
                    after: timeout.unwrap_or_default(),
                });
            }
        }
    }
    let _ = reader.join();

    let status = wait_until(&mut child, deadline, &cmd, timeout)?;
    let stderr = stderr_reader.join().unwrap_or_default();
    if status.success() {
        Ok(())
    } else {
        Err(CommandError::Failed {
            cmd,
            code: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        })
    }
}

/// Run `command` to completion and return its trimmed stdout.
fn capture(mut command: Command) -> Result<String> {
    let cmd = describe(&command);
    let output = command.stdin(Stdio::null()).output()?;
    if !output.status.success() {
        return Err(BlamemuxError::Ingest(format!(
            "command `{}` returned {} ({})",
            cmd,
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Turn a run target into a local working-copy path, if it names one.
pub fn uri_to_filename(uri: &str) -> Option<PathBuf> {
    let candidate = match uri.strip_prefix("file://") {
        Some(path) => PathBuf::from(path),
        None if uri.contains("://") => return None,
        None => PathBuf::from(uri),
    };
    candidate.exists().then_some(candidate)
}

/// Pick a backend by the working-copy markers found at `path`.
pub fn detect(path: &Path) -> Result<Arc<dyn Repository>> {
    if path.join("CVS").is_dir() {
        return Ok(Arc::new(CvsRepository::open(path)?));
    }
    if path.join(".svn").exists() {
        return Ok(Arc::new(SvnRepository::open(path)?));
    }
    match git2::Repository::discover(path) {
        Ok(_) => Ok(Arc::new(GitRepository::open(path)?)),
        Err(_) => Err(BlamemuxError::Unsupported(format!(
            "no git, svn or cvs working copy at {}",
            path.display()
        ))),
    }
}

// ── git ───────────────────────────────────────────────────────────────────

pub struct GitRepository {
    root: PathBuf,
    uri: String,
}

impl GitRepository {
    pub fn open(path: &Path) -> Result<Self> {
        let root = Self::workdir(path)?;
        Ok(Self {
            uri: root.to_string_lossy().into_owned(),
            root,
        })
    }

    fn workdir(path: &Path) -> Result<PathBuf> {
        let repo = git2::Repository::discover(path)?;
        let workdir = repo.workdir().ok_or_else(|| {
            BlamemuxError::Unsupported(format!("{} is a bare repository", path.display()))
        })?;
        Ok(workdir.canonicalize()?)
    }
}

impl Repository for GitRepository {
    fn kind(&self) -> RepoKind {
        RepoKind::Git
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn uri_for_path(&self, path: &Path) -> Result<String> {
        Ok(Self::workdir(path)?.to_string_lossy().into_owned())
    }

    fn checkout_root(&self, path: &Path) -> Result<PathBuf> {
        Self::workdir(path)
    }

    fn blame(
        &self,
        path: &Path,
        revision: &str,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(&str),
    ) -> std::result::Result<(), CommandError> {
        let mut command = Command::new("git");
        command
            .arg("-C")
            .arg(&self.root)
            .args(["blame", "--line-porcelain", revision, "--"])
            .arg(path);
        run_streaming(command, timeout, sink)
    }
}

// ── svn ───────────────────────────────────────────────────────────────────

pub struct SvnRepository {
    root_url: String,
}

impl SvnRepository {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            root_url: Self::info(path, "repos-root-url")?,
        })
    }

    fn info(path: &Path, item: &str) -> Result<String> {
        let mut command = Command::new("svn");
        command
            .args(["info", "--non-interactive", "--show-item", item])
            .arg(path);
        capture(command)
    }
}

impl Repository for SvnRepository {
    fn kind(&self) -> RepoKind {
        RepoKind::Svn
    }

    fn uri(&self) -> &str {
        &self.root_url
    }

    fn uri_for_path(&self, path: &Path) -> Result<String> {
        Self::info(path, "url")
    }

    fn blames_remote(&self) -> bool {
        true
    }

    fn blame(
        &self,
        path: &Path,
        revision: &str,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(&str),
    ) -> std::result::Result<(), CommandError> {
        let mut command = Command::new("svn");
        command
            .args(["blame", "--non-interactive", "-r", revision])
            .arg(path);
        run_streaming(command, timeout, sink)
    }
}

// ── cvs ───────────────────────────────────────────────────────────────────

pub struct CvsRepository {
    root: String,
}

impl CvsRepository {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            root: Self::admin_file(path, "Root")?,
        })
    }

    fn admin_file(path: &Path, name: &str) -> Result<String> {
        let file = path.join("CVS").join(name);
        let text = std::fs::read_to_string(&file).map_err(|e| {
            BlamemuxError::Ingest(format!("cannot read {}: {}", file.display(), e))
        })?;
        Ok(text.trim().to_string())
    }
}

impl Repository for CvsRepository {
    fn kind(&self) -> RepoKind {
        RepoKind::Cvs
    }

    fn uri(&self) -> &str {
        &self.root
    }

    fn uri_for_path(&self, path: &Path) -> Result<String> {
        let root = Self::admin_file(path, "Root")?;
        let module = Self::admin_file(path, "Repository")?;
        Ok(format!("{}/{}", root.trim_end_matches('/'), module))
    }

    fn blame(
        &self,
        path: &Path,
        revision: &str,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(&str),
    ) -> std::result::Result<(), CommandError> {
        // cvs needs to run inside the checkout directory holding the file.
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let file = path.file_name().unwrap_or(path.as_os_str());
        let mut command = Command::new("cvs");
        command
            .current_dir(dir)
            .args(["-Q", "annotate", "-r", revision])
            .arg(file);
        run_streaming(command, timeout, sink)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    #[test]
    fn test_run_streaming_collects_lines() {
        let mut lines = Vec::new();
        run_streaming(shell("printf 'one\\ntwo\\nthree'"), None, &mut |l: &str| {
            lines.push(l.to_string())
        })
        .expect("run");
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_run_streaming_reports_exit_code_and_stderr() {
        let mut lines = Vec::new();
        let err = run_streaming(
            shell("echo partial; echo boom >&2; exit 3"),
            Some(Duration::from_secs(30)),
            &mut |l: &str| lines.push(l.to_string()),
        )
        .expect_err("non-zero exit");
        match err {
            CommandError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(lines, vec!["partial"]);
    }

    #[test]
    fn test_run_streaming_times_out() {
        let started = Instant::now();
        let err = run_streaming(
            shell("exec sleep 30"),
            Some(Duration::from_millis(200)),
            &mut |_: &str| {},
        )
        .expect_err("timeout");
        assert!(matches!(err, CommandError::Timeout { .. }), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let err = run_streaming(
            Command::new("blamemux-definitely-not-a-program"),
            None,
            &mut |_: &str| {},
        )
        .expect_err("spawn failure");
        assert!(matches!(err, CommandError::Io { .. }));
    }

    #[test]
    fn test_uri_to_filename() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = dir.path().to_string_lossy().into_owned();
        assert_eq!(uri_to_filename(&local), Some(dir.path().to_path_buf()));
        assert_eq!(
            uri_to_filename(&format!("file://{}", local)),
            Some(dir.path().to_path_buf())
        );
        assert_eq!(uri_to_filename("svn://example.org/repo"), None);
        assert_eq!(uri_to_filename("/definitely/not/here"), None);
    }

    #[test]
    fn test_cvs_uri_for_path_reads_admin_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cvs = dir.path().join("CVS");
        std::fs::create_dir_all(&cvs).expect("mkdir");
        std::fs::write(cvs.join("Root"), ":pserver:anon@cvs.example.org:/cvsroot\n").expect("root");
        std::fs::write(cvs.join("Repository"), "project/src\n").expect("repository");

        let repo = detect(dir.path()).expect("detect");
        assert_eq!(repo.kind(), RepoKind::Cvs);
        assert_eq!(repo.uri(), ":pserver:anon@cvs.example.org:/cvsroot");
        assert_eq!(
            repo.uri_for_path(dir.path()).expect("uri"),
            ":pserver:anon@cvs.example.org:/cvsroot/project/src"
        );
    }

    #[test]
    fn test_detect_git_and_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            detect(dir.path()),
            Err(BlamemuxError::Unsupported(_))
        ));

        git2::Repository::init(dir.path()).expect("git init");
        let repo = detect(dir.path()).expect("detect");
        assert_eq!(repo.kind(), RepoKind::Git);
        let canonical = dir.path().canonicalize().expect("canonicalize");
        assert_eq!(repo.uri(), canonical.to_string_lossy());
        assert_eq!(
            repo.uri_for_path(dir.path()).expect("uri"),
            canonical.to_string_lossy()
        );

        let sub = dir.path().join("src");
        std::fs::create_dir_all(&sub).expect("mkdir");
        assert_eq!(repo.checkout_root(&sub).expect("checkout root"), canonical);
        assert!(!repo.blames_remote());
    }
}
