//! Thin subprocess wrapper around the `git` binary.
//!
//! Every repository operation the fleet needs (clone, fetch, checkout,
//! commit enumeration by ref, remote management) shells out to `git` and
//! maps failures onto [`FleetError`]. Fetch supports a portable wall-clock
//! deadline implemented as a timed child-process wait.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{FleetError, Result};

/// Poll interval while waiting on a deadlined child process.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Run `git` with `args` in `dir`, returning trimmed stdout.
fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| FleetError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FleetError::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or(""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Check whether a directory holds a git repository (bare or not).
pub fn is_git_repo(dir: &Path) -> bool {
    dir.exists()
        && Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
}

/// Handle to one local repository working copy (or bare mirror).
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
    git_dir: PathBuf,
}

impl GitRepo {
    /// Open an existing repository, validating it with `git rev-parse`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let git_dir = run_git(&dir, &["rev-parse", "--git-dir"])?;
        let git_dir = if Path::new(&git_dir).is_absolute() {
            PathBuf::from(git_dir)
        } else {
            dir.join(git_dir)
        };
        Ok(Self { dir, git_dir })
    }

    /// Clone `url` into `dest` and open the result.
    pub fn clone_from(url: &str, dest: &Path, mirror: bool) -> Result<Self> {
        let dest_str = dest
            .to_str()
            .ok_or_else(|| FleetError::Git(format!("non-utf8 clone path: {}", dest.display())))?;
        let mut args = vec!["clone"];
        if mirror {
            args.push("--mirror");
        }
        args.push(url);
        args.push(dest_str);

        let output = Command::new("git")
            .args(&args)
            .output()
            .map_err(|e| FleetError::Git(format!("failed to run git: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::Git(format!(
                "clone of {url} failed: {}",
                stderr.trim()
            )));
        }
        Self::open(dest)
    }

    /// Directory the repository lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The repository's git directory (`.git`, or the repo itself when bare).
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Resolve a ref to its full commit id.
    pub fn rev_parse(&self, reference: &str) -> Result<String> {
        run_git(&self.dir, &["rev-parse", reference])
    }

    /// Resolve a ref to its abbreviated commit id.
    pub fn rev_parse_short(&self, reference: &str) -> Result<String> {
        run_git(&self.dir, &["rev-parse", "--short", reference])
    }

    /// Enumerate up to `max_count` commits reachable from `reference`,
    /// newest first.
    pub fn rev_list(&self, reference: &str, max_count: usize) -> Result<Vec<String>> {
        let max = max_count.to_string();
        let out = run_git(&self.dir, &["rev-list", "--max-count", &max, reference])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// `git reset --hard`.
    pub fn reset_hard(&self) -> Result<()> {
        run_git(&self.dir, &["reset", "--hard"]).map(|_| ())
    }

    /// Force-checkout a branch ref or exact revision.
    pub fn checkout_force(&self, reference: &str) -> Result<()> {
        run_git(&self.dir, &["checkout", "-f", reference]).map(|_| ())
    }

    /// Names of all configured remotes.
    pub fn remotes(&self) -> Result<Vec<String>> {
        let out = run_git(&self.dir, &["remote"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn remote_url(&self, name: &str) -> Result<String> {
        run_git(&self.dir, &["remote", "get-url", name])
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        run_git(&self.dir, &["remote", "add", name, url]).map(|_| ())
    }

    pub fn remove_remote(&self, name: &str) -> Result<()> {
        run_git(&self.dir, &["remote", "remove", name]).map(|_| ())
    }

    /// Replace a local config key with `value`.
    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        run_git(&self.dir, &["config", "--local", key, value]).map(|_| ())
    }

    /// Append an additional value to a multi-valued local config key.
    pub fn add_config(&self, key: &str, value: &str) -> Result<()> {
        run_git(&self.dir, &["config", "--local", "--add", key, value]).map(|_| ())
    }

    /// Fetch one remote, optionally bounded by a wall-clock deadline.
    ///
    /// With a deadline, the fetch child process is polled and killed when
    /// the deadline passes, yielding [`FleetError::Timeout`]. Output is
    /// discarded either way; callers only see success or the failure kind.
    pub fn fetch_remote(&self, remote: &str, deadline: Option<Duration>) -> Result<()> {
        let mut child = Command::new("git")
            .args(["fetch", remote])
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| FleetError::Git(format!("failed to run git: {e}")))?;

        let started = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| FleetError::Git(format!("failed to wait on git: {e}")))?
            {
                if status.success() {
                    return Ok(());
                }
                return Err(FleetError::Git(format!(
                    "fetch of remote {remote} exited with {status}"
                )));
            }
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FleetError::Timeout(limit));
                }
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Remove a stale garbage-collection log left by a crashed git process.
    pub fn remove_stale_gc_log(&self) {
        let gc_log = self.git_dir.join("gc.log");
        if gc_log.exists() {
            if let Err(e) = std::fs::remove_file(&gc_log) {
                tracing::warn!(path = %gc_log.display(), error = %e, "could not remove stale gc.log");
            }
        }
    }

    /// Remove a stale index lock left by a crashed git process.
    pub fn remove_stale_index_lock(&self) {
        let lock = self.git_dir.join("index.lock");
        if lock.exists() {
            if let Err(e) = std::fs::remove_file(&lock) {
                tracing::warn!(path = %lock.display(), error = %e, "could not remove stale index.lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(repo_dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init"]);
        git(dir.path(), &["config", "user.name", "test-user"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        git(dir.path(), &["branch", "-M", "main"]);
        dir
    }

    #[test]
    fn test_open_valid_repo() {
        let repo = make_git_repo();
        let handle = GitRepo::open(repo.path()).unwrap();
        assert!(handle.git_dir().ends_with(".git"));
    }

    #[test]
    fn test_open_non_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitRepo::open(dir.path()).is_err());
        assert!(!is_git_repo(dir.path()));
    }

    #[test]
    fn test_rev_parse_head() {
        let repo = make_git_repo();
        let handle = GitRepo::open(repo.path()).unwrap();
        let sha = handle.rev_parse("HEAD").unwrap();
        assert_eq!(sha.len(), 40);
        let short = handle.rev_parse_short("HEAD").unwrap();
        assert!(sha.starts_with(&short));
    }

    #[test]
    fn test_rev_list_newest_first() {
        let repo = make_git_repo();
        git(repo.path(), &["commit", "--allow-empty", "-m", "second"]);
        let handle = GitRepo::open(repo.path()).unwrap();
        let commits = handle.rev_list("HEAD", 10).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0], handle.rev_parse("HEAD").unwrap());
    }

    #[test]
    fn test_rev_list_respects_max_count() {
        let repo = make_git_repo();
        for n in 0..4 {
            git(repo.path(), &["commit", "--allow-empty", "-m", &format!("c{n}")]);
        }
        let handle = GitRepo::open(repo.path()).unwrap();
        assert_eq!(handle.rev_list("HEAD", 3).unwrap().len(), 3);
    }

    #[test]
    fn test_clone_and_fetch_local() {
        let upstream = make_git_repo();
        let workdir = tempfile::tempdir().unwrap();
        let dest = workdir.path().join("clone");
        let handle =
            GitRepo::clone_from(upstream.path().to_str().unwrap(), &dest, false).unwrap();
        assert!(is_git_repo(&dest));
        handle.fetch_remote("origin", None).unwrap();
        handle
            .fetch_remote("origin", Some(Duration::from_secs(60)))
            .unwrap();
    }

    #[test]
    fn test_fetch_unknown_remote_fails() {
        let repo = make_git_repo();
        let handle = GitRepo::open(repo.path()).unwrap();
        let err = handle.fetch_remote("nope", None).unwrap_err();
        assert!(matches!(err, FleetError::Git(_)));
    }

    #[test]
    fn test_remote_management() {
        let repo = make_git_repo();
        let handle = GitRepo::open(repo.path()).unwrap();
        handle.add_remote("upstream", "https://example.com/a.git").unwrap();
        assert!(handle.remotes().unwrap().contains(&"upstream".to_string()));
        assert_eq!(
            handle.remote_url("upstream").unwrap(),
            "https://example.com/a.git"
        );
        handle.remove_remote("upstream").unwrap();
        assert!(handle.remotes().unwrap().is_empty());
    }

    #[test]
    fn test_checkout_force_revision() {
        let repo = make_git_repo();
        let handle = GitRepo::open(repo.path()).unwrap();
        let first = handle.rev_parse("HEAD").unwrap();
        git(repo.path(), &["commit", "--allow-empty", "-m", "second"]);
        handle.checkout_force(&first).unwrap();
        assert_eq!(handle.rev_parse("HEAD").unwrap(), first);
    }

    #[test]
    fn test_stale_lock_removal_is_idempotent() {
        let repo = make_git_repo();
        let handle = GitRepo::open(repo.path()).unwrap();
        std::fs::write(handle.git_dir().join("index.lock"), b"").unwrap();
        handle.remove_stale_index_lock();
        assert!(!handle.git_dir().join("index.lock").exists());
        // no lock present: still fine
        handle.remove_stale_index_lock();
        handle.remove_stale_gc_log();
    }
}
