//! Build invocation: one concrete build identified by project, option bag,
//! and revision pin set. Supports duplicate detection on a build server via
//! a deterministic content fingerprint and a shared status record.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::doc;
use crate::error::{FleetError, Result};
use crate::options::BuildOptions;
use crate::revision::RevisionPinSet;
use crate::status::{StatusStore, StoreTiming};

/// Document tag for the invocation document.
const INVOKE_TAG: &str = "BuildInvoke";

/// Filename stem of the shared status record.
const BUILD_INFO_STEM: &str = "_build_info";

/// Summarizes a project and all options required to invoke one build,
/// locally or on CI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInvocation {
    pub project: String,
    pub options: BuildOptions,
    pub revisions: RevisionPinSet,
}

impl BuildInvocation {
    pub fn new(project: impl Into<String>, options: BuildOptions, revisions: RevisionPinSet) -> Self {
        Self {
            project: project.into(),
            options,
            revisions,
        }
    }

    /// Render the compound invocation document: project attribute plus the
    /// embedded pin and options elements. Attribute order is canonical, so
    /// the rendering doubles as the fingerprint input.
    pub fn to_xml(&self) -> String {
        doc::element_with_children(
            INVOKE_TAG,
            vec![("project".to_string(), self.project.clone())],
            &[self.revisions.to_xml(), self.options.to_xml()],
        )
    }

    /// Parse an invocation document.
    pub fn from_xml_str(text: &str) -> Result<Self> {
        let parsed = roxmltree::Document::parse(text)?;
        let root = doc::find_tagged(&parsed, INVOKE_TAG)
            .ok_or_else(|| FleetError::Document(format!("no {INVOKE_TAG} element")))?;
        let project = root
            .attribute("project")
            .ok_or_else(|| FleetError::Document("invocation has no project".to_string()))?
            .to_string();
        let revisions = root
            .children()
            .find(|n| n.has_tag_name("RevSpec"))
            .map(|n| RevisionPinSet::from_node(&n))
            .ok_or_else(|| FleetError::Document("invocation has no RevSpec".to_string()))?;
        let options = root
            .children()
            .find(|n| n.has_tag_name("Options"))
            .map(|n| BuildOptions::from_node(&n))
            .ok_or_else(|| FleetError::Document("invocation has no Options".to_string()))?;
        Ok(Self {
            project,
            options,
            revisions,
        })
    }

    /// Deterministic fingerprint identifying this exact build: SHA-256 of
    /// the caller's salt plus the canonical serialization. Build servers
    /// use it to find in-flight duplicates of the same effective build.
    pub fn fingerprint(&self, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(self.to_xml().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Path of the shared status record for this build slot.
    ///
    /// Derived from the option bag only: two invocations with identical
    /// derivation inputs share one record regardless of differing revision
    /// pins. The record tracks the slot's progress, not any single
    /// invocation's identity.
    pub fn status_path(&self) -> PathBuf {
        let o = &self.options;
        let file = if o.shard == "0" {
            format!("{BUILD_INFO_STEM}.txt")
        } else {
            format!("{BUILD_INFO_STEM}_{}.txt", o.shard)
        };
        PathBuf::from(&o.result_root)
            .join(&self.project)
            .join(&o.arch)
            .join(&o.config)
            .join(&o.hardware)
            .join(file)
    }

    /// Status store for this build slot, with production retry timing.
    pub fn status_store(&self) -> StatusStore {
        StatusStore::new(self.status_path())
    }

    /// Status store with caller-supplied retry timing.
    pub fn status_store_with_timing(&self, timing: StoreTiming) -> StatusStore {
        StatusStore::with_timing(self.status_path(), timing)
    }

    /// Short human-readable label for logs and build-server UI.
    pub fn short_label(&self) -> String {
        let o = &self.options;
        let mut items = vec![
            self.project.as_str(),
            o.arch.as_str(),
            o.config.as_str(),
            o.hardware.as_str(),
        ];
        if o.shard != "0" {
            items.push(o.shard.as_str());
        }
        items.join(" ")
    }
}

impl std::fmt::Display for BuildInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_invocation() -> BuildInvocation {
        let mut revisions = BTreeMap::new();
        revisions.insert("mesa".to_string(), "abc123".to_string());
        revisions.insert("piglit".to_string(), "def456".to_string());
        BuildInvocation::new(
            "mesa",
            BuildOptions {
                result_root: "/mnt/results".to_string(),
                arch: "x86_64".to_string(),
                config: "release".to_string(),
                hardware: "tgl".to_string(),
                ..BuildOptions::default()
            },
            RevisionPinSet::new(revisions),
        )
    }

    #[test]
    fn test_document_roundtrip() {
        let invocation = sample_invocation();
        let reparsed = BuildInvocation::from_xml_str(&invocation.to_xml()).unwrap();
        assert_eq!(invocation, reparsed);
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let invocation = sample_invocation();
        assert_eq!(invocation.fingerprint("salt"), invocation.fingerprint("salt"));
    }

    #[test]
    fn test_fingerprint_changes_with_any_input() {
        let base = sample_invocation();

        let mut other = base.clone();
        other.project = "piglit".to_string();
        assert_ne!(base.fingerprint("salt"), other.fingerprint("salt"));

        let mut other = base.clone();
        other.options.config = "debug".to_string();
        assert_ne!(base.fingerprint("salt"), other.fingerprint("salt"));

        let mut revisions = BTreeMap::new();
        revisions.insert("mesa".to_string(), "abc124".to_string());
        revisions.insert("piglit".to_string(), "def456".to_string());
        let mut other = base.clone();
        other.revisions = RevisionPinSet::new(revisions);
        assert_ne!(base.fingerprint("salt"), other.fingerprint("salt"));

        assert_ne!(base.fingerprint("salt"), base.fingerprint("pepper"));
    }

    #[test]
    fn test_status_path_derivation() {
        let invocation = sample_invocation();
        assert_eq!(
            invocation.status_path(),
            PathBuf::from("/mnt/results/mesa/x86_64/release/tgl/_build_info.txt")
        );
    }

    #[test]
    fn test_status_path_shard_suffix() {
        let mut invocation = sample_invocation();
        invocation.options.shard = "3".to_string();
        assert!(invocation
            .status_path()
            .ends_with("tgl/_build_info_3.txt"));
    }

    #[test]
    fn test_status_path_ignores_revisions() {
        let a = sample_invocation();
        let mut b = sample_invocation();
        b.revisions = RevisionPinSet::new(BTreeMap::new());
        assert_eq!(a.status_path(), b.status_path());
    }

    #[test]
    fn test_short_label() {
        let mut invocation = sample_invocation();
        assert_eq!(invocation.short_label(), "mesa x86_64 release tgl");
        invocation.options.shard = "2".to_string();
        assert_eq!(invocation.short_label(), "mesa x86_64 release tgl 2");
    }

    #[test]
    fn test_parse_requires_embedded_elements() {
        let err = BuildInvocation::from_xml_str(r#"<BuildInvoke project="mesa" />"#).unwrap_err();
        assert!(matches!(err, FleetError::Document(_)));
    }
}
