//! ctxkeep Core Library
//!
//! Tiered context memory for long-running agent sessions: importance
//! scoring, HOT/WARM/COLD tiering, flash-save compaction under a token
//! budget, and checkpoint/restore of a project's file tree, relational
//! state and memory.
//!
//! ## Layer 1 - Domain Logic
//!
//! Every component receives a shared [`CoreContext`] holding the storage
//! backends, the clock and budget sources, configuration and the lock
//! registry.

pub mod cas;
pub mod checkpoint;
pub mod clock;
pub mod compaction;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod locks;
pub mod metrics;
pub mod obs;
pub mod runtime;
pub mod scoring;
pub mod service;
pub mod telemetry;
pub mod tiering;
pub mod tokens;

pub use cas::FsCasStore;
pub use checkpoint::{
    CheckpointEngine, CheckpointRequest, MemorySnapshot, RestoreOutcome, RestorePreview,
    RestoreReport, RestoreStep, SnapshotStep,
};
pub use clock::{BudgetSource, Clock, FixedBudget, ManualClock, SystemClock};
pub use compaction::{CompactionOutcome, CompactionPhase, CompactionReport, FlashSave};
pub use config::CoreConfig;
pub use context::{ContextStats, ContextStore, NewItem};
pub use error::{CtxKeepError, Result};
pub use git::{capture_head_sha, is_git_repo, GitFileTree, DATA_DIR};
pub use locks::LockRegistry;
pub use runtime::{Backends, CoreContext};
pub use service::MemoryService;
pub use tiering::{tier_for, TierCounts};
pub use tokens::token_cost;

pub use ctxkeep_state::{
    AgentRef, CheckpointId, CheckpointRecord, CheckpointTrigger, ItemId, ItemKind, MemoryItem,
    SurrealHandle, Tier,
};

pub use metrics::METRICS;
pub use obs::ProjectSpan;
pub use telemetry::init_tracing;

/// ctxkeep version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
