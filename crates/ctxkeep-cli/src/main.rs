//! ctxkeep - tiered context memory for agent sessions
//!
//! The `ctxkeep` command operates on the repository given by `--repo`
//! (default: current directory). State lives under `<repo>/.ctxkeep/`.
//!
//! ## Commands
//!
//! - `append`: Store a memory item for an agent
//! - `access`: Record that an agent read an item
//! - `items`: List an agent's items by importance
//! - `stats`: Tier and token statistics for one or more agents
//! - `rescore`: Recompute scores and tiers
//! - `compact`: Run flash-save compaction
//! - `checkpoint`: Create, list, show, delete and restore project checkpoints
//!
//! Engine settings come from `CTXKEEP_TOKEN_BUDGET`,
//! `CTXKEEP_COMPACTION_THRESHOLD` and `CTXKEEP_SNAPSHOT_TIMEOUT_SECS`;
//! invalid values are logged and ignored. Explicit flags win over both.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ctxkeep_core::{
    is_git_repo, AgentRef, Backends, CheckpointId, CheckpointTrigger, CoreConfig, CoreContext,
    FsCasStore, GitFileTree, ItemId, ItemKind, MemoryService, NewItem, ProjectSpan,
    SurrealHandle, Tier, DATA_DIR, METRICS,
};
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "ctxkeep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tiered context memory with checkpoint/restore", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Repository root (must be a git working tree)
    #[arg(long, global = true, env = "CTXKEEP_REPO", default_value = ".")]
    repo: PathBuf,

    /// Project id (default: repository directory name)
    #[arg(long, global = true, env = "CTXKEEP_PROJECT")]
    project: Option<String>,

    /// Token budget per agent (overrides CTXKEEP_TOKEN_BUDGET)
    #[arg(long, global = true)]
    token_budget: Option<u64>,

    /// Fraction of the budget that triggers compaction
    /// (overrides CTXKEEP_COMPACTION_THRESHOLD)
    #[arg(long, global = true)]
    compaction_threshold: Option<f64>,

    /// Snapshot timeout in seconds (overrides CTXKEEP_SNAPSHOT_TIMEOUT_SECS)
    #[arg(long, global = true)]
    snapshot_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a memory item for an agent
    Append {
        /// Agent id
        #[arg(short, long)]
        agent: String,

        /// Item type (SPEC_SECTION, TASK, ERROR, ...)
        #[arg(short, long, default_value = "TASK")]
        kind: ItemKind,

        /// Item content (read from stdin when omitted)
        content: Option<String>,
    },

    /// Record that an agent accessed an item
    Access {
        /// Agent id
        #[arg(short, long)]
        agent: String,

        /// Item id
        item: String,
    },

    /// List an agent's items, most important first
    Items {
        /// Agent id
        #[arg(short, long)]
        agent: String,

        /// Only items in this tier (hot, warm, cold)
        #[arg(short, long)]
        tier: Option<Tier>,

        /// Maximum number of items to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show tier and token statistics
    Stats {
        /// Agent id (repeatable)
        #[arg(short, long, required = true)]
        agent: Vec<String>,
    },

    /// Recompute importance scores and tiers
    Rescore {
        /// Agent id
        #[arg(short, long)]
        agent: String,
    },

    /// Checkpoint, then archive COLD items when over the threshold
    Compact {
        /// Agent id
        #[arg(short, long)]
        agent: String,

        /// Compact even when below the threshold
        #[arg(long)]
        force: bool,
    },

    /// Manage project checkpoints
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Capture file tree, relational state and memory
    Create {
        /// Checkpoint name
        name: String,

        /// Longer description
        #[arg(short, long)]
        description: Option<String>,

        /// What caused this checkpoint
        #[arg(short, long, default_value = "manual")]
        trigger: CheckpointTrigger,
    },

    /// List checkpoints, oldest first
    List {
        /// Only checkpoints with this trigger (manual, compaction, ...)
        #[arg(short, long)]
        trigger: Option<CheckpointTrigger>,

        /// Newest first
        #[arg(long)]
        desc: bool,
    },

    /// Show one checkpoint record
    Show {
        /// Checkpoint id
        checkpoint: String,
    },

    /// Remove a checkpoint from the catalog
    Delete {
        /// Checkpoint id
        checkpoint: String,
    },

    /// Restore a checkpoint
    Restore {
        /// Checkpoint id
        checkpoint: String,

        /// Show what would change without applying it
        #[arg(long)]
        preview: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ctxkeep_core::init_tracing(cli.json, level);

    let repo = std::fs::canonicalize(&cli.repo)
        .context(format!("Failed to resolve repository path {:?}", cli.repo))?;
    if !is_git_repo(&repo) {
        bail!("{} is not a git working tree", repo.display());
    }
    let project = cli
        .project
        .clone()
        .unwrap_or_else(|| default_project(&repo));
    let config = build_config(&cli, CoreConfig::from_env())?;

    let _span = ProjectSpan::enter(&project);
    let service = open_service(&repo, config).await?;

    let output = execute(&service, &project, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    METRICS.flush();
    Ok(())
}

fn default_project(repo: &Path) -> String {
    repo.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

/// Apply command-line overrides on top of `base`.
fn build_config(cli: &Cli, base: CoreConfig) -> Result<CoreConfig> {
    let mut config = base;
    if let Some(budget) = cli.token_budget {
        config = config.with_token_budget(budget);
    }
    if let Some(threshold) = cli.compaction_threshold {
        config = config.with_compaction_threshold(threshold);
    }
    if let Some(secs) = cli.snapshot_timeout_secs {
        config = config.with_snapshot_timeout(Duration::from_secs(secs));
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn open_service(repo: &Path, config: CoreConfig) -> Result<MemoryService> {
    let data_dir = repo.join(DATA_DIR);

    let handle = SurrealHandle::setup_from_env(&data_dir.join("db"))
        .await
        .context("Failed to connect to ctxkeep database")?;
    let cas = FsCasStore::new(data_dir.join("cas"))
        .map_err(|e| anyhow::anyhow!("failed to open CAS store: {e}"))?;

    debug!(repo = %repo.display(), "opened ctxkeep backends");
    let backends = Backends::surreal(handle, Arc::new(GitFileTree::new(repo)), Arc::new(cas));
    Ok(MemoryService::new(CoreContext::new(backends, config)))
}

async fn execute(service: &MemoryService, project: &str, command: Commands) -> Result<Value> {
    let agent_ref = |id: &str| AgentRef::new(project, id);

    let output = match command {
        Commands::Append {
            agent,
            kind,
            content,
        } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin()?,
            };
            let item = service
                .append(NewItem::new(&agent_ref(&agent), kind, content))
                .await
                .context("Failed to append item")?;
            serde_json::to_value(item)?
        }
        Commands::Access { agent, item } => {
            let item = service
                .record_access(&agent_ref(&agent), &ItemId(item.clone()))
                .await
                .context(format!("Failed to record access to item {item}"))?;
            serde_json::to_value(item)?
        }
        Commands::Items { agent, tier, limit } => {
            let items = service.items(&agent_ref(&agent), tier, limit).await?;
            serde_json::to_value(items)?
        }
        Commands::Stats { agent } => {
            let agents: Vec<AgentRef> = agent.iter().map(|id| agent_ref(id)).collect();
            let mut stats = service.stats_many(&agents).await?;
            if stats.len() == 1 {
                serde_json::to_value(stats.remove(0))?
            } else {
                serde_json::to_value(stats)?
            }
        }
        Commands::Rescore { agent } => {
            let items = service.rescore(&agent_ref(&agent)).await?;
            serde_json::to_value(items)?
        }
        Commands::Compact { agent, force } => {
            let report = service
                .compact(&agent_ref(&agent), force)
                .await
                .context("Compaction failed")?;
            serde_json::to_value(report)?
        }
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Create {
                name,
                description,
                trigger,
            } => {
                let record = service
                    .checkpoint(project, &name, description.as_deref(), trigger)
                    .await
                    .context(format!("Failed to create checkpoint '{name}'"))?;
                serde_json::to_value(record)?
            }
            CheckpointAction::List { trigger, desc } => {
                let mut records = if desc {
                    service.checkpoints_newest_first(project).await?
                } else {
                    service.checkpoints(project).await?
                };
                if let Some(trigger) = trigger {
                    records.retain(|record| record.trigger == trigger);
                }
                serde_json::to_value(records)?
            }
            CheckpointAction::Show { checkpoint } => {
                let record = service
                    .checkpoint_record(project, &CheckpointId(checkpoint.clone()))
                    .await
                    .context(format!("Failed to load checkpoint {checkpoint}"))?;
                serde_json::to_value(record)?
            }
            CheckpointAction::Delete { checkpoint } => {
                service
                    .delete_checkpoint(project, &CheckpointId(checkpoint.clone()))
                    .await
                    .context(format!("Failed to delete checkpoint {checkpoint}"))?;
                json!({ "deleted": checkpoint })
            }
            CheckpointAction::Restore {
                checkpoint,
                preview,
            } => {
                let outcome = service
                    .restore(project, &CheckpointId(checkpoint.clone()), preview)
                    .await
                    .context(format!("Failed to restore checkpoint {checkpoint}"))?;
                serde_json::to_value(outcome)?
            }
        },
    };

    Ok(output)
}

fn read_stdin() -> Result<String> {
    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("Failed to read item content from stdin")?;
    Ok(content)
}
