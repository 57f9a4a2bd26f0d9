//! Build specification document: the fleet's declaration of repositories,
//! remotes, and branch groups.
//!
//! ```xml
//! <build_spec>
//!   <build_master hostname="cache-host" />
//!   <repos>
//!     <mesa repo="https://example.com/mesa.git" branch="origin/main">
//!       <remote name="staging" repo="https://example.com/staging.git" />
//!     </mesa>
//!   </repos>
//!   <branches>
//!     <branch name="main" project="mesa">
//!       <mesa branch="origin/main" />
//!       <drm trigger="false" />
//!     </branch>
//!   </branches>
//! </build_spec>
//! ```

use std::path::Path;

use crate::error::{FleetError, Result};

/// Branch ref a repository tracks when the spec does not say otherwise.
pub const DEFAULT_BRANCH: &str = "origin/main";

/// One declared repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoDecl {
    pub name: String,
    /// Upstream clone URL.
    pub url: String,
    /// Trigger ref for this repository (e.g. `origin/main`).
    pub branch: String,
    /// Additional named remotes beyond origin.
    pub remotes: Vec<RemoteDecl>,
}

/// A named remote beyond origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDecl {
    pub name: String,
    pub url: String,
}

/// Per-project override inside a branch group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPinDecl {
    pub project: String,
    /// Branch ref override; `None` keeps the repository's default.
    pub branch: Option<String>,
    /// Trigger participation override; `None` means trigger-eligible.
    pub trigger: Option<bool>,
}

/// One branch group: a named collection of per-project branch pins that
/// defines a single logical build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchGroupDecl {
    pub name: String,
    /// The project this group primarily builds.
    pub project: String,
    pub pins: Vec<BranchPinDecl>,
}

/// Parsed build specification document.
#[derive(Debug, Clone, Default)]
pub struct BuildSpec {
    /// Cache host used by managed-lab machines in place of upstream remotes.
    pub master_host: Option<String>,
    pub repos: Vec<RepoDecl>,
    pub branch_groups: Vec<BranchGroupDecl>,
}

impl BuildSpec {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&text)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(text)?;
        let root = doc.root_element();

        let master_host = root
            .children()
            .find(|n| n.has_tag_name("build_master"))
            .and_then(|n| n.attribute("hostname"))
            .map(str::to_string);

        let mut repos = Vec::new();
        if let Some(repos_node) = root.children().find(|n| n.has_tag_name("repos")) {
            for tag in repos_node.children().filter(|n| n.is_element()) {
                let name = tag.tag_name().name().to_string();
                let url = tag
                    .attribute("repo")
                    .ok_or_else(|| {
                        FleetError::Spec(format!("repo {name} has no repo attribute"))
                    })?
                    .to_string();
                let branch = tag
                    .attribute("branch")
                    .unwrap_or(DEFAULT_BRANCH)
                    .to_string();
                let remotes = tag
                    .children()
                    .filter(|n| n.has_tag_name("remote"))
                    .filter_map(|n| {
                        match (n.attribute("name"), n.attribute("repo")) {
                            (Some(rn), Some(ru)) if !rn.is_empty() && !ru.is_empty() => {
                                Some(RemoteDecl {
                                    name: rn.to_string(),
                                    url: ru.to_string(),
                                })
                            }
                            _ => {
                                tracing::warn!(
                                    project = %name,
                                    "ignoring remote declaration without name/repo"
                                );
                                None
                            }
                        }
                    })
                    .collect();
                repos.push(RepoDecl {
                    name,
                    url,
                    branch,
                    remotes,
                });
            }
        }

        let mut branch_groups = Vec::new();
        if let Some(branches_node) = root.children().find(|n| n.has_tag_name("branches")) {
            for tag in branches_node.children().filter(|n| n.has_tag_name("branch")) {
                let name = tag
                    .attribute("name")
                    .ok_or_else(|| FleetError::Spec("branch group has no name".to_string()))?
                    .to_string();
                let project = tag
                    .attribute("project")
                    .ok_or_else(|| {
                        FleetError::Spec(format!("branch group {name} has no project"))
                    })?
                    .to_string();
                let pins = tag
                    .children()
                    .filter(|n| n.is_element())
                    .map(|n| BranchPinDecl {
                        project: n.tag_name().name().to_string(),
                        branch: n.attribute("branch").map(str::to_string),
                        trigger: n.attribute("trigger").map(|t| t == "true"),
                    })
                    .collect();
                branch_groups.push(BranchGroupDecl {
                    name,
                    project,
                    pins,
                });
            }
        }

        Ok(Self {
            master_host,
            repos,
            branch_groups,
        })
    }

    /// Look up a declared repository by project name.
    pub fn repo(&self, name: &str) -> Option<&RepoDecl> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Look up a branch group by name.
    pub fn branch_group(&self, name: &str) -> Option<&BranchGroupDecl> {
        self.branch_groups.iter().find(|g| g.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
<build_spec>
  <build_master hostname="bldmaster" />
  <repos>
    <mesa repo="https://example.com/mesa.git" branch="origin/stable">
      <remote name="staging" repo="https://example.com/staging.git" />
      <remote name="" repo="https://example.com/broken.git" />
    </mesa>
    <drm repo="https://example.com/drm.git" />
  </repos>
  <branches>
    <branch name="main" project="mesa">
      <mesa branch="origin/main" />
      <drm trigger="false" />
    </branch>
    <branch name="stable" project="mesa" />
  </branches>
</build_spec>
"#;

    #[test]
    fn test_parse_full_spec() {
        let spec = BuildSpec::from_str(SPEC).unwrap();
        assert_eq!(spec.master_host.as_deref(), Some("bldmaster"));
        assert_eq!(spec.repos.len(), 2);
        assert_eq!(spec.branch_groups.len(), 2);
    }

    #[test]
    fn test_repo_attributes_and_defaults() {
        let spec = BuildSpec::from_str(SPEC).unwrap();
        let mesa = spec.repo("mesa").unwrap();
        assert_eq!(mesa.url, "https://example.com/mesa.git");
        assert_eq!(mesa.branch, "origin/stable");
        // empty remote name dropped
        assert_eq!(mesa.remotes.len(), 1);
        assert_eq!(mesa.remotes[0].name, "staging");

        let drm = spec.repo("drm").unwrap();
        assert_eq!(drm.branch, DEFAULT_BRANCH);
        assert!(drm.remotes.is_empty());
    }

    #[test]
    fn test_branch_group_overrides() {
        let spec = BuildSpec::from_str(SPEC).unwrap();
        let main = spec.branch_group("main").unwrap();
        assert_eq!(main.project, "mesa");
        assert_eq!(main.pins.len(), 2);

        let mesa_pin = main.pins.iter().find(|p| p.project == "mesa").unwrap();
        assert_eq!(mesa_pin.branch.as_deref(), Some("origin/main"));
        assert_eq!(mesa_pin.trigger, None);

        let drm_pin = main.pins.iter().find(|p| p.project == "drm").unwrap();
        assert_eq!(drm_pin.trigger, Some(false));

        let stable = spec.branch_group("stable").unwrap();
        assert!(stable.pins.is_empty());
    }

    #[test]
    fn test_repo_without_url_is_an_error() {
        let err = BuildSpec::from_str("<build_spec><repos><mesa /></repos></build_spec>")
            .unwrap_err();
        assert!(matches!(err, FleetError::Spec(_)));
    }

    #[test]
    fn test_unknown_lookups_return_none() {
        let spec = BuildSpec::from_str(SPEC).unwrap();
        assert!(spec.repo("nope").is_none());
        assert!(spec.branch_group("nope").is_none());
    }
}
