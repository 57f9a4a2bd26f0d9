//! Buildfleet Core Library
//!
//! Tracks the fleet of git repositories feeding a continuous build
//! pipeline: clone/fetch lifecycle, branch-group trigger detection,
//! revision pin sets, branch-point analysis, and the shared build status
//! store used to deduplicate concurrent invocations.

pub mod branch_set;
pub mod doc;
pub mod error;
pub mod git;
pub mod invoke;
pub mod obs;
pub mod options;
pub mod poller;
pub mod repo_set;
pub mod revision;
pub mod spec;
pub mod status;
pub mod telemetry;

pub use branch_set::BranchSet;
pub use error::{FleetError, Result};
pub use git::{is_git_repo, GitRepo};
pub use invoke::BuildInvocation;
pub use obs::{emit_poll_finished, emit_poll_started, emit_trigger_detected, PollSpan};
pub use options::BuildOptions;
pub use poller::FleetPoller;
pub use repo_set::{detect_build_lab, GitTiming, RepoSet, RepoSetConfig};
pub use revision::{commits_between, midpoint_revision, RevisionPinSet, CMD_LINE_EXCLUDED};
pub use spec::{
    BranchGroupDecl, BranchPinDecl, BuildSpec, RemoteDecl, RepoDecl, DEFAULT_BRANCH,
};
pub use status::{StatusStore, StoreTiming};
pub use telemetry::init_tracing;

/// Buildfleet version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
