//! A branch set pins one tracked branch ref per project for one logical
//! build group. A change to any trigger-eligible branch results in a world
//! build.

use std::collections::BTreeMap;
use std::thread;

use tracing::warn;

use crate::error::Result;
use crate::repo_set::RepoSet;
use crate::spec::BranchGroupDecl;

/// One project's pinned branch inside a branch set.
#[derive(Debug, Clone)]
struct ProjectBranchPin {
    branch: String,
    /// Commit id observed when the pin was last resolved.
    sha: String,
    /// Whether this pin participates in trigger decisions.
    trigger: bool,
}

/// A named collection of per-project branch pins representing one logical,
/// atomically-triggered build.
#[derive(Debug, Clone)]
pub struct BranchSet {
    pub name: String,
    /// The project this group primarily builds.
    pub project: String,
    pins: BTreeMap<String, ProjectBranchPin>,
}

impl BranchSet {
    /// Build a branch set from its group declaration.
    ///
    /// Every cloned project defaults to the repository set's trigger ref
    /// with triggering disabled; projects listed in the declaration become
    /// trigger-eligible unless explicitly marked `trigger="false"`, and may
    /// override the branch ref. Pins whose ref does not resolve in the
    /// local clone are dropped with a warning, never fatally.
    pub fn new(group: &BranchGroupDecl, repos: &RepoSet) -> Self {
        let mut declared: BTreeMap<String, (Option<String>, Option<bool>)> = BTreeMap::new();
        for pin in &group.pins {
            declared.insert(pin.project.clone(), (pin.branch.clone(), pin.trigger));
        }

        let mut pins = BTreeMap::new();
        for project in repos.projects() {
            let mut branch = match repos.branch(&project) {
                Ok(b) => b.to_string(),
                Err(_) => continue,
            };
            let mut trigger = false;
            if let Some((branch_override, trigger_override)) = declared.get(&project) {
                trigger = trigger_override.unwrap_or(true);
                if let Some(b) = branch_override {
                    branch = b.clone();
                }
            }

            let repo = match repos.repo(&project) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let sha = match repo.rev_parse(&branch) {
                Ok(sha) => sha,
                Err(e) => {
                    warn!(
                        group = %group.name,
                        project = %project,
                        branch = %branch,
                        error = %e,
                        "branch does not resolve, dropping pin"
                    );
                    continue;
                }
            };
            pins.insert(
                project,
                ProjectBranchPin {
                    branch,
                    sha,
                    trigger,
                },
            );
        }

        Self {
            name: group.name.clone(),
            project: group.project.clone(),
            pins,
        }
    }

    /// True when construction dropped every pin.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Re-fetch the repository set and re-resolve every pin to the ref's
    /// latest commit. Always mutates; no comparison happens here.
    pub fn update_commits(&mut self, repos: &mut RepoSet) -> Result<()> {
        repos.fetch()?;
        for (project, pin) in self.pins.iter_mut() {
            let repo = repos.repo(project)?;
            pin.sha = repo.rev_parse(&pin.branch)?;
        }
        Ok(())
    }

    /// Compare each trigger-eligible pin against its ref's current commit
    /// (no re-fetch). Returns `"<project>=<short-id>"` for the first
    /// project whose commit moved, or `None` when nothing changed.
    ///
    /// One-shot: callers own deciding when to re-poll, and remaining
    /// diverged projects are picked up on the next cycle.
    pub fn needs_build(&self, repos: &RepoSet) -> Option<String> {
        for (project, pin) in &self.pins {
            if !pin.trigger {
                continue;
            }
            let repo = match repos.repo(project) {
                Ok(r) => r,
                Err(e) => {
                    warn!(project = %project, error = %e, "pin has no repo, skipping");
                    continue;
                }
            };
            let current = match repo.rev_parse(&pin.branch) {
                Ok(sha) => sha,
                Err(e) => {
                    warn!(project = %project, branch = %pin.branch, error = %e, "branch no longer resolves, skipping");
                    continue;
                }
            };
            if pin.sha != current {
                let short = repo
                    .rev_parse_short(&current)
                    .unwrap_or_else(|_| current.clone());
                return Some(format!("{project}={short}"));
            }
        }
        None
    }

    /// Force-checkout every pinned branch, hard-resetting first.
    ///
    /// Retries with a pause on failure; between attempts a stale index lock
    /// left by a crashed git process is removed, which recovers the common
    /// failure mode of a prior process dying mid-operation.
    pub fn checkout(&self, repos: &RepoSet) -> Result<()> {
        let timing = repos.timing().clone();
        for (project, pin) in &self.pins {
            let repo = repos.repo(project)?;
            let mut last_err = None;
            for attempt in 0..timing.checkout_attempts {
                if attempt > 0 {
                    thread::sleep(timing.checkout_pause);
                    repo.remove_stale_index_lock();
                }
                let result = repo
                    .reset_hard()
                    .and_then(|_| repo.checkout_force(&pin.branch));
                match result {
                    Ok(()) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => {
                        warn!(project = %project, branch = %pin.branch, error = %e, "error checking out");
                        last_err = Some(e);
                    }
                }
            }
            if let Some(e) = last_err {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Branch ref a project is pinned to, if present in this set.
    pub fn branch(&self, project: &str) -> Option<&str> {
        self.pins.get(project).map(|p| p.branch.as_str())
    }

    /// Last-observed commit id for a project's pin.
    pub fn pinned_sha(&self, project: &str) -> Option<&str> {
        self.pins.get(project).map(|p| p.sha.as_str())
    }

    /// Whether a project's pin participates in trigger decisions.
    pub fn is_trigger(&self, project: &str) -> Option<bool> {
        self.pins.get(project).map(|p| p.trigger)
    }
}
