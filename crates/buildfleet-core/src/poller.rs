//! Fleet poller: owns the repository set and every branch set declared for
//! the fleet, and surfaces the branch groups that need a build each cycle.

use std::collections::BTreeMap;

use tracing::warn;

use crate::branch_set::BranchSet;
use crate::error::{FleetError, Result};
use crate::obs;
use crate::repo_set::{RepoSet, RepoSetConfig};
use crate::revision::RevisionPinSet;
use crate::spec::BuildSpec;

/// Polls a fleet of repositories for branch-group trigger events.
pub struct FleetPoller {
    repos: RepoSet,
    branch_sets: Vec<BranchSet>,
}

impl FleetPoller {
    /// Bring the repository set up to date and resolve every declared
    /// branch group. Groups that resolve to no usable pins are dropped
    /// with a warning; the rest of the fleet continues.
    pub fn new(spec: BuildSpec, config: RepoSetConfig) -> Result<Self> {
        let mut repos = RepoSet::new(spec, config);
        Self::refresh(&mut repos)?;

        let mut branch_sets = Vec::new();
        for group in repos.build_spec().branch_groups.clone() {
            let set = BranchSet::new(&group, &repos);
            if set.is_empty() {
                warn!(group = %group.name, "couldn't get status for branch group");
                continue;
            }
            branch_sets.push(set);
        }
        Ok(Self { repos, branch_sets })
    }

    /// Fetch the whole set; referencing an unfetched remote fails the
    /// first time branches are polled after a new repo lands in the
    /// specification, so clone on demand and fetch again.
    fn refresh(repos: &mut RepoSet) -> Result<()> {
        match repos.fetch() {
            Err(FleetError::NotCloned(project)) => {
                warn!(project = %project, "project not cloned yet, running clone pass");
                repos.clone_repos()?;
                repos.fetch()
            }
            other => other,
        }
    }

    /// One poll cycle: re-fetch, then ask every branch set whether it
    /// needs a build. Triggered groups have their pins refreshed so the
    /// same commit is not reported again next cycle.
    ///
    /// Returns group name → trigger description for this cycle only.
    pub fn poll(&mut self) -> Result<BTreeMap<String, String>> {
        let _span = obs::PollSpan::enter(self.branch_sets.len());
        obs::emit_poll_started(self.branch_sets.len());

        Self::refresh(&mut self.repos)?;

        let FleetPoller { repos, branch_sets } = self;
        let mut triggered = BTreeMap::new();
        for set in branch_sets.iter_mut() {
            if let Some(trigger) = set.needs_build(repos) {
                obs::emit_trigger_detected(&set.name, &trigger);
                set.update_commits(repos)?;
                triggered.insert(set.name.clone(), trigger);
            }
        }

        obs::emit_poll_finished(triggered.len());
        Ok(triggered)
    }

    /// Check out a branch group's pinned branches, then apply explicit
    /// `project=revision` pins on top. An unknown group is warned about
    /// and skipped; the pins still apply.
    pub fn checkout(&self, group: &str, pins: &str) -> Result<()> {
        match self.branch_set(group) {
            Some(set) => set.checkout(&self.repos)?,
            None => warn!(group = %group, "branch group not found, ignoring"),
        }
        let pin_set = RevisionPinSet::from_cmd_line_param(pins)?;
        pin_set.checkout(&self.repos)
    }

    pub fn branch_set(&self, name: &str) -> Option<&BranchSet> {
        self.branch_sets.iter().find(|s| s.name == name)
    }

    pub fn branch_sets(&self) -> &[BranchSet] {
        &self.branch_sets
    }

    pub fn repos(&self) -> &RepoSet {
        &self.repos
    }

    pub fn repos_mut(&mut self) -> &mut RepoSet {
        &mut self.repos
    }
}
