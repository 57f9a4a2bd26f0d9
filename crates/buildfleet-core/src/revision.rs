//! Revision pin sets: an immutable per-project commit snapshot defining one
//! build's exact source state, plus revision-range selection helpers.

use std::collections::BTreeMap;
use std::path::Path;

use crate::doc;
use crate::error::{FleetError, Result};
use crate::git::GitRepo;
use crate::repo_set::RepoSet;

/// Document tag for the revision pin document.
const REV_SPEC_TAG: &str = "RevSpec";

/// Auxiliary projects never rendered into the CLI parameter form: test
/// frameworks, header-only dependencies, and internal CI tooling that
/// downstream build commands do not accept as pins.
pub const CMD_LINE_EXCLUDED: &[&str] = &[
    "apitrace",
    "gmock",
    "gtest",
    "kc-cts",
    "mesa_ci",
    "prerelease",
    "sixonix",
    "spirvheaders",
    "spirvtools",
];

/// Immutable mapping from project name to a resolved revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionPinSet {
    revisions: BTreeMap<String, String>,
}

impl RevisionPinSet {
    /// Pin an explicit project → revision mapping.
    pub fn new(revisions: BTreeMap<String, String>) -> Self {
        Self { revisions }
    }

    /// Snapshot the current short commit id of every repository in the set.
    /// Projects whose repository is unavailable are skipped silently.
    pub fn from_repo_set(repos: &RepoSet) -> Self {
        let mut revisions = BTreeMap::new();
        for project in repos.projects() {
            let repo = match repos.repo(&project) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if let Ok(rev) = repo.rev_parse_short("HEAD") {
                revisions.insert(project, rev);
            }
        }
        Self { revisions }
    }

    /// Parse from a revision pin document: a `RevSpec` root, or any
    /// document embedding a `RevSpec` element.
    pub fn from_xml_str(text: &str) -> Result<Self> {
        let parsed = roxmltree::Document::parse(text)?;
        let node = doc::find_tagged(&parsed, REV_SPEC_TAG)
            .ok_or_else(|| FleetError::Document(format!("no {REV_SPEC_TAG} element")))?;
        Ok(Self::from_node(&node))
    }

    pub fn from_xml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_xml_str(&text)
    }

    /// Build from an already-located `RevSpec` element.
    pub(crate) fn from_node(node: &roxmltree::Node<'_, '_>) -> Self {
        let revisions = node
            .attributes()
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect();
        Self { revisions }
    }

    /// Render the pin document, attributes sorted by project.
    pub fn to_xml(&self) -> String {
        doc::element(
            REV_SPEC_TAG,
            self.revisions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }

    /// Parse whitespace-separated `project=revision` tokens.
    pub fn from_cmd_line_param(params: &str) -> Result<Self> {
        let mut revisions = BTreeMap::new();
        for token in params.split_whitespace() {
            let (project, rev) = token.split_once('=').ok_or_else(|| {
                FleetError::Document(format!("malformed revision token: {token}"))
            })?;
            revisions.insert(project.to_string(), rev.to_string());
        }
        Ok(Self { revisions })
    }

    /// Render the single-line CLI parameter form, sorted by project, with
    /// auxiliary projects excluded.
    pub fn to_cmd_line_param(&self) -> String {
        self.revisions
            .iter()
            .filter(|(project, _)| !CMD_LINE_EXCLUDED.contains(&project.as_str()))
            .map(|(project, rev)| format!("{project}={rev}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Force-checkout every pinned revision. No retry at this layer;
    /// failures propagate.
    pub fn checkout(&self, repos: &RepoSet) -> Result<()> {
        for (project, revision) in &self.revisions {
            let repo = repos.repo(project)?;
            repo.checkout_force(revision)?;
        }
        Ok(())
    }

    /// Pinned revision for a project.
    pub fn revision(&self, project: &str) -> Result<&str> {
        self.revisions
            .get(project)
            .map(String::as_str)
            .ok_or_else(|| FleetError::UnpinnedProject(project.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.revisions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

impl std::fmt::Display for RevisionPinSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_xml())
    }
}

/// Commits reachable from `end` but not yet walked back to `start`,
/// newest first, walking at most `max_walk` commits.
///
/// Errors when `start` is not found within the walk; callers cannot
/// meaningfully bisect an unrelated range.
pub fn commits_between(
    repo: &GitRepo,
    start: &str,
    end: &str,
    max_walk: usize,
) -> Result<Vec<String>> {
    let start_sha = repo.rev_parse(start)?;
    let mut collected = Vec::new();
    for sha in repo.rev_list(end, max_walk)? {
        if sha == start_sha {
            return Ok(collected);
        }
        collected.push(sha);
    }
    Err(FleetError::Git(format!(
        "{start} not found in history of {end}"
    )))
}

/// Midpoint commit of the `start..end` walk; used to backfill a
/// performance plot one bisection step at a time.
pub fn midpoint_revision(
    repo: &GitRepo,
    start: &str,
    end: &str,
    max_walk: usize,
) -> Result<Option<String>> {
    let commits = commits_between(repo, start, end, max_walk)?;
    if commits.is_empty() {
        return Ok(None);
    }
    let mid = commits.len() / 2;
    Ok(Some(commits[mid].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pins(entries: &[(&str, &str)]) -> RevisionPinSet {
        RevisionPinSet::new(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_xml_roundtrip_identical_mapping() {
        let original = pins(&[("mesa", "abc123"), ("piglit", "def456")]);
        let reparsed = RevisionPinSet::from_xml_str(&original.to_xml()).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_parse_accepts_embedded_element() {
        let text = r#"<BuildInvoke project="mesa"><RevSpec mesa="abc123" /></BuildInvoke>"#;
        let parsed = RevisionPinSet::from_xml_str(text).unwrap();
        assert_eq!(parsed.revision("mesa").unwrap(), "abc123");
    }

    #[test]
    fn test_parse_rejects_missing_element() {
        let err = RevisionPinSet::from_xml_str("<Options arch=\"x86_64\" />").unwrap_err();
        assert!(matches!(err, FleetError::Document(_)));
    }

    #[test]
    fn test_cmd_line_param_roundtrip() {
        let original = pins(&[("mesa", "abc123"), ("drm", "999fff")]);
        let rendered = original.to_cmd_line_param();
        assert_eq!(rendered, "drm=999fff mesa=abc123");
        let reparsed = RevisionPinSet::from_cmd_line_param(&rendered).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_cmd_line_param_excludes_auxiliary_projects() {
        let set = pins(&[("mesa", "abc123"), ("gtest", "zzz999")]);
        let rendered = set.to_cmd_line_param();
        assert_eq!(rendered, "mesa=abc123");
        assert!(!rendered.contains("gtest"));
        // the pin itself stays in the map
        assert_eq!(set.revision("gtest").unwrap(), "zzz999");
    }

    #[test]
    fn test_malformed_cmd_line_token() {
        let err = RevisionPinSet::from_cmd_line_param("mesa-abc123").unwrap_err();
        assert!(matches!(err, FleetError::Document(_)));
    }

    #[test]
    fn test_unpinned_lookup_fails() {
        let set = pins(&[("mesa", "abc123")]);
        assert!(matches!(
            set.revision("drm"),
            Err(FleetError::UnpinnedProject(_))
        ));
    }

    #[test]
    fn test_display_matches_to_xml() {
        let set = pins(&[("mesa", "abc123")]);
        assert_eq!(format!("{set}"), set.to_xml());
    }

    mod range {
        use super::super::*;
        use std::path::Path;
        use std::process::Command;

        fn git(dir: &Path, args: &[&str]) {
            let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
            assert!(
                output.status.success(),
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        fn make_history(commits: usize) -> (tempfile::TempDir, GitRepo) {
            let dir = tempfile::tempdir().unwrap();
            git(dir.path(), &["init"]);
            git(dir.path(), &["config", "user.name", "test-user"]);
            git(dir.path(), &["config", "user.email", "test@example.com"]);
            for n in 0..commits {
                git(
                    dir.path(),
                    &["commit", "--allow-empty", "-m", &format!("c{n}")],
                );
            }
            let repo = GitRepo::open(dir.path()).unwrap();
            (dir, repo)
        }

        #[test]
        fn test_commits_between_excludes_endpoints_start_side() {
            let (_dir, repo) = make_history(5);
            let commits = commits_between(&repo, "HEAD~3", "HEAD", 100).unwrap();
            assert_eq!(commits.len(), 3);
            assert_eq!(commits[0], repo.rev_parse("HEAD").unwrap());
            assert!(!commits.contains(&repo.rev_parse("HEAD~3").unwrap()));
        }

        #[test]
        fn test_commits_between_unrelated_start_errors() {
            let (_dir, repo) = make_history(3);
            // bound the walk so the start commit is never reached
            let err = commits_between(&repo, "HEAD~2", "HEAD", 1).unwrap_err();
            assert!(matches!(err, FleetError::Git(_)));
        }

        #[test]
        fn test_midpoint_revision_picks_middle() {
            let (_dir, repo) = make_history(6);
            let commits = commits_between(&repo, "HEAD~5", "HEAD", 100).unwrap();
            let mid = midpoint_revision(&repo, "HEAD~5", "HEAD", 100)
                .unwrap()
                .unwrap();
            assert_eq!(mid, commits[commits.len() / 2]);
        }

        #[test]
        fn test_midpoint_of_empty_range_is_none() {
            let (_dir, repo) = make_history(2);
            let mid = midpoint_revision(&repo, "HEAD", "HEAD", 100).unwrap();
            assert!(mid.is_none());
        }
    }
}
