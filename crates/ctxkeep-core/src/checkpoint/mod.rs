//! Checkpoint Engine: durable snapshots of a project's file tree,
//! relational state and memory, and their restoration.
//!
//! A snapshot is a saga of four ordered steps whose last step, the catalog
//! append, is the single commit point. Artifacts written by earlier steps of
//! a failed snapshot are left behind unreferenced.

mod diff;
mod engine;

use std::fmt;

use chrono::{DateTime, Utc};
use ctxkeep_state::{CheckpointId, CheckpointRecord, FileChange, ItemId, MemoryItem};
use serde::{Deserialize, Serialize};

pub use diff::diff_memory;
pub use engine::{CheckpointEngine, CheckpointRequest};

/// Current `MemorySnapshot` layout version.
pub const MEMORY_SNAPSHOT_FORMAT: u32 = 1;

/// Steps of checkpoint creation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStep {
    FileTree,
    Relational,
    Memory,
    Catalog,
}

impl SnapshotStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStep::FileTree => "file_tree",
            SnapshotStep::Relational => "relational",
            SnapshotStep::Memory => "memory",
            SnapshotStep::Catalog => "catalog",
        }
    }
}

impl fmt::Display for SnapshotStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps of a restore, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStep {
    FileTree,
    Relational,
    Memory,
}

impl RestoreStep {
    pub const ALL: [RestoreStep; 3] = [
        RestoreStep::FileTree,
        RestoreStep::Relational,
        RestoreStep::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStep::FileTree => "file_tree",
            RestoreStep::Relational => "relational",
            RestoreStep::Memory => "memory",
        }
    }
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized memory dump stored in the CAS for each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub format_version: u32,
    pub project_id: String,
    pub exported_at: DateTime<Utc>,
    pub items: Vec<MemoryItem>,
}

/// What applying a checkpoint would change.
///
/// Memory changes are seen from the restore's point of view: `items_added`
/// exist only in the checkpoint, `items_removed` exist only in the live set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorePreview {
    pub checkpoint_id: CheckpointId,
    pub checkpoint_name: String,
    pub file_changes: Vec<FileChange>,
    pub items_added: Vec<ItemId>,
    pub items_removed: Vec<ItemId>,
    pub items_modified: Vec<ItemId>,
}

impl RestorePreview {
    pub fn total_changes(&self) -> usize {
        self.file_changes.len()
            + self.items_added.len()
            + self.items_removed.len()
            + self.items_modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub checkpoint: CheckpointRecord,
    pub completed_steps: Vec<RestoreStep>,
    pub items_restored: usize,
    pub restored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Preview(RestorePreview),
    Applied(RestoreReport),
}
