//! The set of git repositories declared in the build specification.
//!
//! Owns the clone/fetch lifecycle for every project, repairs corrupt local
//! clones, and performs branch-point analysis. One `RepoSet` instance drives
//! sequential operations; it is not safe for concurrent mutation.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{FleetError, Result};
use crate::git::{is_git_repo, GitRepo};
use crate::spec::BuildSpec;

/// Directory marker that permanently disables a project whose clone
/// repeatedly failed outside the managed lab.
const DO_NOT_USE: &str = "do_not_use";

/// Commits enumerated from the tracked branch during branch-point analysis.
/// Long-lived branches need a deep set.
const BRANCH_WALK_LIMIT: usize = 1200;

/// Commits walked from the trigger ref before giving up on finding the
/// branch point.
const TRIGGER_WALK_LIMIT: usize = 8000;

/// Retry counts, pauses, and deadlines for git operations.
///
/// Defaults match production behavior; tests use [`GitTiming::immediate`].
#[derive(Debug, Clone)]
pub struct GitTiming {
    /// Clone attempts inside the managed lab (one attempt elsewhere).
    pub clone_attempts_lab: u32,
    pub clone_pause: Duration,
    /// Fetch attempts per remote per round.
    pub fetch_attempts: u32,
    pub fetch_pause: Duration,
    /// Wall-clock deadline per fetch attempt; `None` relies on the remote
    /// operation's own timeout behavior.
    pub fetch_deadline: Option<Duration>,
    /// Forced-checkout attempts for a branch set.
    pub checkout_attempts: u32,
    pub checkout_pause: Duration,
}

impl Default for GitTiming {
    fn default() -> Self {
        Self {
            clone_attempts_lab: 10,
            clone_pause: Duration::from_secs(10),
            fetch_attempts: 4,
            fetch_pause: Duration::from_secs(1),
            fetch_deadline: Some(Duration::from_secs(300)),
            checkout_attempts: 10,
            checkout_pause: Duration::from_secs(10),
        }
    }
}

impl GitTiming {
    /// All pauses zeroed and deadlines kept; for tests and local tooling.
    pub fn immediate() -> Self {
        Self {
            clone_pause: Duration::ZERO,
            fetch_pause: Duration::ZERO,
            checkout_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Construction-time configuration for a [`RepoSet`].
#[derive(Debug, Clone)]
pub struct RepoSetConfig {
    /// Destination directory for local clones.
    pub repos_root: PathBuf,
    /// Clone/fetch from the build master's cache when in the lab.
    pub use_cache: bool,
    /// Pass `--mirror` when creating clones.
    pub mirror: bool,
    /// Whether this machine is inside the managed lab. See
    /// [`detect_build_lab`] for the probe; tests supply the flag directly.
    pub build_lab: bool,
    pub timing: GitTiming,
}

impl RepoSetConfig {
    pub fn new(repos_root: impl Into<PathBuf>) -> Self {
        Self {
            repos_root: repos_root.into(),
            use_cache: true,
            mirror: false,
            build_lab: false,
            timing: GitTiming::default(),
        }
    }
}

/// Probe whether this machine can reach the build master's cache host,
/// i.e. whether it sits inside the managed lab.
pub fn detect_build_lab(master_host: &str) -> bool {
    let target;
    let args: Vec<&str> = if cfg!(windows) {
        vec!["-w", "1", master_host]
    } else {
        target = format!("{master_host}.local");
        vec!["-c", "1", "-w", "1", "-q", &target]
    };
    Command::new("ping")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Derive the cache remote URL for a project.
fn cache_url(master_host: &str, project: &str) -> String {
    if cfg!(windows) {
        format!("git://{master_host}/git/{project}")
    } else {
        format!("git://{master_host}.local/git/{project}")
    }
}

/// The set of git repositories specified in the build specification.
pub struct RepoSet {
    spec: BuildSpec,
    config: RepoSetConfig,
    /// Effective cache decision: requested and inside the lab and a cache
    /// host is declared.
    use_cache: bool,
    repos: BTreeMap<String, GitRepo>,
    /// Trigger ref per project (usually the default branch).
    branches: BTreeMap<String, String>,
}

impl RepoSet {
    /// Build the set, registering any existing valid clones under the
    /// repos root. Invalid clones are removed so a later clone pass can
    /// repair them; sentinel-marked projects are left untouched.
    pub fn new(spec: BuildSpec, config: RepoSetConfig) -> Self {
        let use_cache = config.use_cache && config.build_lab && spec.master_host.is_some();
        let mut set = Self {
            spec,
            config,
            use_cache,
            repos: BTreeMap::new(),
            branches: BTreeMap::new(),
        };

        for decl in set.spec.repos.clone() {
            let repo_dir = set.config.repos_root.join(&decl.name);
            if !repo_dir.exists() || repo_dir.join(DO_NOT_USE).exists() {
                continue;
            }
            if !is_git_repo(&repo_dir) {
                info!(
                    path = %repo_dir.display(),
                    "repo path is not a valid git repo, removing"
                );
                if let Err(e) = std::fs::remove_dir_all(&repo_dir) {
                    warn!(path = %repo_dir.display(), error = %e, "could not remove invalid repo");
                }
                continue;
            }
            match GitRepo::open(&repo_dir) {
                Ok(repo) => {
                    set.repos.insert(decl.name.clone(), repo);
                    set.branches.insert(decl.name.clone(), decl.branch.clone());
                }
                Err(e) => {
                    warn!(project = %decl.name, error = %e, "could not open existing repo");
                }
            }
        }
        set
    }

    /// Clone all declared repositories that are missing locally and bring
    /// their remote configuration in line with the specification.
    ///
    /// Does *not* fetch. Repeated clone failure outside the managed lab
    /// marks the project permanently unusable via a sentinel directory;
    /// inside the lab, failed projects are simply absent this run.
    pub fn clone_repos(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.config.repos_root)?;
        let attempts = if self.config.build_lab && self.use_cache {
            self.config.timing.clone_attempts_lab
        } else {
            1
        };

        for decl in self.spec.repos.clone() {
            let repo_dir = self.config.repos_root.join(&decl.name);
            let sentinel = repo_dir.join(DO_NOT_USE);
            let url = match &self.spec.master_host {
                Some(host) if self.use_cache => cache_url(host, &decl.name),
                _ => decl.url.clone(),
            };

            // Re-validate before cloning; a corrupt clone is removed and
            // repaired unless explicitly disabled.
            if repo_dir.exists() && !sentinel.exists() && !is_git_repo(&repo_dir) {
                info!(
                    path = %repo_dir.display(),
                    "repo path exists but is not a valid git repo, attempting repair"
                );
                std::fs::remove_dir_all(&repo_dir)?;
            }

            if !repo_dir.exists() {
                let mut cloned = false;
                for attempt in 0..attempts {
                    if attempt > 0 {
                        thread::sleep(self.config.timing.clone_pause);
                    }
                    info!(url = %url, project = %decl.name, "attempting clone");
                    match GitRepo::clone_from(&url, &repo_dir, self.config.mirror) {
                        Ok(_) => {
                            if self.config.mirror {
                                // export marker so a git daemon will serve it
                                std::fs::write(repo_dir.join("git-daemon-export-ok"), b"")?;
                            }
                            cloned = true;
                            break;
                        }
                        Err(e) => {
                            warn!(url = %url, error = %e, "unable to clone repo");
                        }
                    }
                }
                if !cloned && !self.config.build_lab {
                    // disable from any future attempts to clone/fetch
                    std::fs::create_dir_all(&sentinel)?;
                    continue;
                }
            }
            if sentinel.exists() {
                continue;
            }

            let repo = match GitRepo::open(&repo_dir) {
                Ok(repo) => repo,
                Err(e) => {
                    warn!(project = %decl.name, error = %e, "unable to clone repo");
                    continue;
                }
            };

            if self.use_cache {
                // The cache mirrors every upstream ref; map them under the
                // namespaced remote-tracking layout.
                repo.set_config("remote.origin.fetch", "+refs/*:refs/remotes/*")?;
                repo.add_config(
                    "remote.origin.fetch",
                    "+refs/heads/*:refs/remotes/origin/*",
                )?;
            } else {
                self.configure_remotes(&repo, &decl.name)?;
            }

            self.repos.insert(decl.name.clone(), repo);
            self.branches.insert(decl.name.clone(), decl.branch.clone());
        }
        Ok(())
    }

    /// Add declared remotes that are missing and prune remotes no longer
    /// declared in the specification (origin always stays).
    fn configure_remotes(&self, repo: &GitRepo, project: &str) -> Result<()> {
        let decl = match self.spec.repo(project) {
            Some(d) => d,
            None => return Ok(()),
        };
        let existing: HashSet<String> = repo.remotes()?.into_iter().collect();
        for remote in &decl.remotes {
            if !existing.contains(&remote.name) {
                repo.add_remote(&remote.name, &remote.url)?;
                repo.set_config(
                    &format!("remote.{}.fetch", remote.name),
                    &format!("+refs/heads/*:refs/{}/*", remote.name),
                )?;
            }
        }
        let declared: HashSet<&str> = decl.remotes.iter().map(|r| r.name.as_str()).collect();
        for name in existing {
            if name == "origin" || declared.contains(name.as_str()) {
                continue;
            }
            info!(project = %project, remote = %name, "remote no longer declared, deleting");
            repo.remove_remote(&name)?;
        }
        Ok(())
    }

    /// Fetch every remote of every declared repository.
    ///
    /// Fetching an uncloned project is a programmer error and fails fast
    /// with [`FleetError::NotCloned`]. Individual remote failures (network
    /// errors, deadline expiry) are logged and skipped; they never abort
    /// the pass.
    pub fn fetch(&mut self) -> Result<()> {
        let timing = self.config.timing.clone();
        for decl in &self.spec.repos {
            let repo = self
                .repos
                .get(&decl.name)
                .ok_or_else(|| FleetError::NotCloned(decl.name.clone()))?;

            repo.remove_stale_gc_log();

            let remotes = match repo.remotes() {
                Ok(r) => r,
                Err(e) => {
                    warn!(project = %decl.name, error = %e, "could not list remotes, skipping repo this round");
                    continue;
                }
            };
            for remote in remotes {
                info!(project = %decl.name, remote = %remote, "fetching");
                let mut fetched = false;
                for _ in 0..timing.fetch_attempts {
                    match repo.fetch_remote(&remote, timing.fetch_deadline) {
                        Ok(()) => {
                            fetched = true;
                            break;
                        }
                        Err(FleetError::Timeout(limit)) => {
                            warn!(remote = %remote, deadline = ?limit, "fetch timed out");
                        }
                        Err(e) => {
                            warn!(remote = %remote, error = %e, "error fetching");
                        }
                    }
                    thread::sleep(timing.fetch_pause);
                }
                if !fetched {
                    warn!(project = %decl.name, remote = %remote, "failed to fetch remote, ignoring");
                }
            }
        }
        Ok(())
    }

    /// Revisions present on each project's trigger ref but missing from the
    /// tracked branch: everything walked before the branch point.
    ///
    /// Projects where no branch point is found within the traversal bound
    /// contribute nothing; downstream consumers use the result to suppress
    /// known failures that have not landed on the tracked branch yet.
    pub fn branch_missing_revisions(&self) -> Vec<String> {
        let mut revs = Vec::new();
        for (project, repo) in &self.repos {
            let branch_commits: HashSet<String> = match repo.rev_list("HEAD", BRANCH_WALK_LIMIT)
            {
                Ok(commits) => commits.into_iter().collect(),
                Err(e) => {
                    warn!(
                        project = %project,
                        error = %e,
                        "unable to enumerate branch commits, make sure your repos are up to date"
                    );
                    continue;
                }
            };
            let trigger_ref = match self.branches.get(project) {
                Some(r) => r,
                None => continue,
            };
            let walk = match repo.rev_list(trigger_ref, TRIGGER_WALK_LIMIT) {
                Ok(commits) => commits,
                Err(e) => {
                    warn!(project = %project, trigger_ref = %trigger_ref, error = %e, "unable to walk trigger ref");
                    continue;
                }
            };

            let mut pending = Vec::new();
            let mut branch_point = None;
            for sha in walk {
                if branch_commits.contains(&sha) {
                    branch_point = Some(sha);
                    break;
                }
                pending.push(sha);
            }
            match branch_point {
                Some(sha) => {
                    info!(project = %project, branch_point = %sha, "found branch point");
                    revs.extend(pending);
                }
                None => {
                    warn!(project = %project, "no branch point within traversal bound");
                }
            }
        }
        revs
    }

    /// Handle for a cloned project.
    pub fn repo(&self, project: &str) -> Result<&GitRepo> {
        self.repos
            .get(project)
            .ok_or_else(|| FleetError::UnknownProject(project.to_string()))
    }

    /// Trigger ref for a cloned project.
    pub fn branch(&self, project: &str) -> Result<&str> {
        self.branches
            .get(project)
            .map(String::as_str)
            .ok_or_else(|| FleetError::UnknownProject(project.to_string()))
    }

    /// Names of all successfully cloned projects.
    pub fn projects(&self) -> Vec<String> {
        self.repos.keys().cloned().collect()
    }

    pub fn timing(&self) -> &GitTiming {
        &self.config.timing
    }

    pub fn build_spec(&self) -> &BuildSpec {
        &self.spec
    }

    /// Path a project's clone lives (or would live) at.
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.config.repos_root.join(project)
    }
}

impl std::fmt::Debug for RepoSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoSet")
            .field("repos_root", &self.config.repos_root)
            .field("use_cache", &self.use_cache)
            .field("projects", &self.projects())
            .finish()
    }
}
