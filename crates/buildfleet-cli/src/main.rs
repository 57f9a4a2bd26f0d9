//! buildfleet - continuous-build repository fleet tracker
//!
//! ## Commands
//!
//! - `clone`: clone every repository declared in the build specification
//! - `fetch`: fetch all remotes of every cloned repository
//! - `poll`: report branch groups whose tracked branches moved
//! - `checkout`: check out a branch group, optionally pinning revisions
//! - `revisions`: snapshot the current revision pin set
//! - `missing-revs`: revisions on trigger refs not yet on tracked branches
//! - `pick-revision`: midpoint of a revision range (perf-plot backfill)
//! - `status`: read/write one build slot's shared status record

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use buildfleet_core::{
    detect_build_lab, init_tracing, midpoint_revision, BuildInvocation, BuildOptions, BuildSpec,
    FleetPoller, RepoSet, RepoSetConfig, RevisionPinSet, StatusStore, StoreTiming,
};

#[derive(Parser)]
#[command(name = "buildfleet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Repository fleet tracker for a continuous build pipeline", long_about = None)]
struct Cli {
    /// Path to the build specification document
    #[arg(long, global = true, default_value = "build_spec.xml")]
    spec: PathBuf,

    /// Destination directory for repository clones
    #[arg(long, global = true, default_value = "repos")]
    repos_root: PathBuf,

    /// Never clone/fetch from the build master's cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone every repository declared in the build specification
    Clone {
        /// Create mirror clones (for machines re-serving the cache)
        #[arg(long)]
        mirror: bool,
    },

    /// Fetch all remotes of every cloned repository
    Fetch,

    /// Poll every branch group once and report triggers
    Poll {
        /// Print the poll report as JSON
        #[arg(long)]
        json_output: bool,
    },

    /// Check out a branch group's pinned branches
    Checkout {
        /// Branch group name
        group: String,

        /// Explicit `project=revision` pins applied after the group checkout
        #[arg(long, default_value = "")]
        revisions: String,
    },

    /// Snapshot the current revision of every cloned repository
    Revisions {
        /// Render the pin document instead of the CLI parameter form
        #[arg(long)]
        xml: bool,
    },

    /// Revisions on trigger refs that have not landed on tracked branches
    MissingRevs,

    /// Pick the midpoint revision of `start..end` for one project
    PickRevision {
        /// Project whose history to walk
        #[arg(long)]
        project: String,

        /// Older bound (exclusive)
        #[arg(long)]
        start: String,

        /// Newer bound (inclusive), defaults to the trigger ref tip
        #[arg(long, default_value = "HEAD")]
        end: String,
    },

    /// Read or write one build slot's shared status record
    Status {
        #[command(subcommand)]
        action: StatusAction,
    },
}

#[derive(Subcommand)]
enum StatusAction {
    /// Read one key from the status record
    Get {
        key: String,

        /// Retry while another process may still be writing the key
        #[arg(long)]
        block: bool,

        #[command(flatten)]
        slot: SlotArgs,
    },

    /// Write one key into the status record
    Set {
        key: String,
        value: String,

        #[command(flatten)]
        slot: SlotArgs,
    },
}

/// Identifies one build slot's status record.
#[derive(clap::Args)]
struct SlotArgs {
    #[arg(long)]
    result_root: String,

    #[arg(long)]
    project: String,

    #[arg(long, default_value = "x86_64")]
    arch: String,

    #[arg(long, default_value = "debug")]
    config: String,

    #[arg(long, default_value = "builder")]
    hardware: String,

    #[arg(long, default_value = "0")]
    shard: String,
}

impl SlotArgs {
    fn status_store(&self) -> StatusStore {
        let invocation = BuildInvocation::new(
            self.project.clone(),
            BuildOptions {
                result_root: self.result_root.clone(),
                arch: self.arch.clone(),
                config: self.config.clone(),
                hardware: self.hardware.clone(),
                shard: self.shard.clone(),
                ..BuildOptions::default()
            },
            RevisionPinSet::new(BTreeMap::new()),
        );
        invocation.status_store_with_timing(StoreTiming::default())
    }
}

/// One poll cycle's outcome, for machine consumers.
#[derive(Serialize)]
struct PollReport {
    computed_at: DateTime<Utc>,
    triggers: BTreeMap<String, String>,
}

fn load_spec(cli: &Cli) -> Result<BuildSpec> {
    BuildSpec::from_file(&cli.spec)
        .with_context(|| format!("reading build specification {}", cli.spec.display()))
}

fn repo_config(cli: &Cli, spec: &BuildSpec, mirror: bool) -> RepoSetConfig {
    let build_lab = !cli.no_cache
        && spec
            .master_host
            .as_deref()
            .map(detect_build_lab)
            .unwrap_or(false);
    RepoSetConfig {
        use_cache: !cli.no_cache,
        mirror,
        build_lab,
        ..RepoSetConfig::new(&cli.repos_root)
    }
}

fn cloned_repo_set(cli: &Cli) -> Result<RepoSet> {
    let spec = load_spec(cli)?;
    let config = repo_config(cli, &spec, false);
    let mut repos = RepoSet::new(spec, config);
    repos.clone_repos().context("cloning repositories")?;
    Ok(repos)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match &cli.command {
        Commands::Clone { mirror } => {
            let spec = load_spec(&cli)?;
            let config = repo_config(&cli, &spec, *mirror);
            let mut repos = RepoSet::new(spec, config);
            repos.clone_repos().context("cloning repositories")?;
            for project in repos.projects() {
                println!("{project}");
            }
        }

        Commands::Fetch => {
            let mut repos = cloned_repo_set(&cli)?;
            repos.fetch().context("fetching repositories")?;
        }

        Commands::Poll { json_output } => {
            let spec = load_spec(&cli)?;
            let config = repo_config(&cli, &spec, false);
            let mut poller = FleetPoller::new(spec, config).context("building fleet poller")?;
            let triggers = poller.poll().context("polling branch groups")?;
            info!(triggered = triggers.len(), "poll cycle complete");
            if *json_output {
                let report = PollReport {
                    computed_at: Utc::now(),
                    triggers,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (group, trigger) in &triggers {
                    println!("{group} {trigger}");
                }
            }
        }

        Commands::Checkout { group, revisions } => {
            let spec = load_spec(&cli)?;
            let config = repo_config(&cli, &spec, false);
            let poller = FleetPoller::new(spec, config).context("building fleet poller")?;
            poller
                .checkout(group, revisions)
                .with_context(|| format!("checking out branch group {group}"))?;
        }

        Commands::Revisions { xml } => {
            let repos = cloned_repo_set(&cli)?;
            let pins = RevisionPinSet::from_repo_set(&repos);
            if *xml {
                println!("{}", pins.to_xml());
            } else {
                println!("{}", pins.to_cmd_line_param());
            }
        }

        Commands::MissingRevs => {
            let mut repos = cloned_repo_set(&cli)?;
            repos.fetch().context("fetching repositories")?;
            for rev in repos.branch_missing_revisions() {
                println!("{rev}");
            }
        }

        Commands::PickRevision {
            project,
            start,
            end,
        } => {
            let repos = cloned_repo_set(&cli)?;
            let repo = repos.repo(project)?;
            let end_ref = if end == "HEAD" {
                repos.branch(project)?.to_string()
            } else {
                end.clone()
            };
            match midpoint_revision(repo, start, &end_ref, 8000)? {
                Some(rev) => {
                    info!(project = %project, "picked midpoint revision");
                    println!("{project}={rev}");
                }
                None => println!("{project}={start}"),
            }
        }

        Commands::Status { action } => match action {
            StatusAction::Get { key, block, slot } => {
                match slot.status_store().get(key, *block) {
                    Some(value) => println!("{value}"),
                    None => std::process::exit(1),
                }
            }
            StatusAction::Set { key, value, slot } => {
                slot.status_store()
                    .set(key.clone(), serde_json::Value::String(value.clone()))
                    .context("writing status record")?;
            }
        },
    }

    Ok(())
}
