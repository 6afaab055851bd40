//! Storage trait definitions for ctxkeep
//!
//! These traits define the persistence seams of the memory manager:
//! - `ItemStore`: durable record set of memory items, keyed by (project, agent)
//! - `CheckpointCatalog`: append-only catalog of checkpoints
//! - `FileTreeBackend`: versioned working tree (snapshot / reset)
//! - `RelationalBackend`: relational project state (backup / restore)
//! - `CasStore`: content-addressed blobs (serialized memory dumps)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identity of a memory item (UUID v4 string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    /// Generate a new random ItemId
    pub fn new() -> Self {
        ItemId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a checkpoint in the catalog (UUID v4 string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub String);

impl CheckpointId {
    /// Generate a new random CheckpointId
    pub fn new() -> Self {
        CheckpointId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Memory namespace of one agent working on one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentRef {
    pub project_id: String,
    pub agent_id: String,
}

impl AgentRef {
    pub fn new(project_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            agent_id: agent_id.into(),
        }
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.agent_id)
    }
}

// ---------------------------------------------------------------------------
// Memory items
// ---------------------------------------------------------------------------

/// Kind of a memory item.
///
/// Serialized as its upper-snake-case label. Labels that are not recognised
/// are kept verbatim in `Other` instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemKind {
    Task,
    Code,
    Error,
    SpecSection,
    TestResult,
    PrdSection,
    Decision,
    Other(String),
}

impl ItemKind {
    pub fn as_str(&self) -> &str {
        match self {
            ItemKind::Task => "TASK",
            ItemKind::Code => "CODE",
            ItemKind::Error => "ERROR",
            ItemKind::SpecSection => "SPEC_SECTION",
            ItemKind::TestResult => "TEST_RESULT",
            ItemKind::PrdSection => "PRD_SECTION",
            ItemKind::Decision => "DECISION",
            ItemKind::Other(label) => label,
        }
    }
}

impl From<&str> for ItemKind {
    fn from(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "TASK" => ItemKind::Task,
            "CODE" => ItemKind::Code,
            "ERROR" => ItemKind::Error,
            "SPEC_SECTION" => ItemKind::SpecSection,
            "TEST_RESULT" => ItemKind::TestResult,
            "PRD_SECTION" => ItemKind::PrdSection,
            "DECISION" => ItemKind::Decision,
            _ => ItemKind::Other(label.to_string()),
        }
    }
}

impl From<String> for ItemKind {
    fn from(label: String) -> Self {
        ItemKind::from(label.as_str())
    }
}

impl From<ItemKind> for String {
    fn from(kind: ItemKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for ItemKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(ItemKind::from(s))
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance tier of a memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Tier::Hot),
            "warm" => Ok(Tier::Warm),
            "cold" => Ok(Tier::Cold),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single piece of agent working memory.
///
/// `importance_score` and `tier` are caches of the last rescoring; they can
/// always be recomputed from the other fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: ItemId,
    pub project_id: String,
    pub agent_id: String,
    pub kind: ItemKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub importance_score: f64,
    pub tier: Tier,
}

impl MemoryItem {
    pub fn agent_ref(&self) -> AgentRef {
        AgentRef::new(self.project_id.clone(), self.agent_id.clone())
    }

    pub fn belongs_to(&self, agent: &AgentRef) -> bool {
        self.project_id == agent.project_id && self.agent_id == agent.agent_id
    }
}

/// New score and tier for one item, applied by `ItemStore::update_scores`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub item_id: ItemId,
    pub importance_score: f64,
    pub tier: Tier,
}

/// Durable record set of memory items.
///
/// Guarantees:
/// - `update_scores` applies the whole batch or nothing.
/// - `touch` only ever increases `access_count`.
/// - `replace_project` swaps a project's whole item set atomically.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert a fully-formed item.
    async fn insert(&self, item: MemoryItem) -> StorageResult<()>;

    /// Fetch one item. Returns `StorageError::ItemNotFound` if absent.
    async fn get(&self, id: &ItemId) -> StorageResult<MemoryItem>;

    /// Increment `access_count` and set `last_accessed_at`, returning the updated item.
    async fn touch(&self, id: &ItemId, at: DateTime<Utc>) -> StorageResult<MemoryItem>;

    /// All items owned by one agent namespace.
    async fn list_agent(&self, agent: &AgentRef) -> StorageResult<Vec<MemoryItem>>;

    /// All items of every agent in a project.
    async fn list_project(&self, project_id: &str) -> StorageResult<Vec<MemoryItem>>;

    /// Apply a batch of score/tier updates atomically.
    async fn update_scores(&self, updates: &[ScoreUpdate]) -> StorageResult<()>;

    /// Delete the given items, returning how many existed.
    async fn delete(&self, ids: &[ItemId]) -> StorageResult<usize>;

    /// Replace every item of `project_id` with `items`.
    async fn replace_project(&self, project_id: &str, items: Vec<MemoryItem>)
        -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Commit-like reference into the versioned file tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeRef(pub String);

impl TreeRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 chars)
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for TreeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a relational-state backup artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupRef(pub String);

impl BackupRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What caused a checkpoint to be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Manual,
    Compaction,
    Auto,
    PhaseTransition,
    Pause,
}

impl CheckpointTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointTrigger::Manual => "manual",
            CheckpointTrigger::Compaction => "compaction",
            CheckpointTrigger::Auto => "auto",
            CheckpointTrigger::PhaseTransition => "phase_transition",
            CheckpointTrigger::Pause => "pause",
        }
    }
}

impl FromStr for CheckpointTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(CheckpointTrigger::Manual),
            "compaction" => Ok(CheckpointTrigger::Compaction),
            "auto" => Ok(CheckpointTrigger::Auto),
            "phase_transition" => Ok(CheckpointTrigger::PhaseTransition),
            "pause" => Ok(CheckpointTrigger::Pause),
            other => Err(format!(
                "invalid trigger '{other}', expected one of: auto, compaction, manual, pause, phase_transition"
            )),
        }
    }
}

impl fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of project state captured alongside a checkpoint, for quick inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Distinct agents holding memory at snapshot time, sorted
    pub agents_active: Vec<String>,
    pub context_items_count: usize,
    pub total_tokens: u64,
    pub hot_count: usize,
    pub warm_count: usize,
    pub cold_count: usize,
}

/// Immutable catalog entry pointing at the three snapshot artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: CheckpointId,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger: CheckpointTrigger,
    pub tree_ref: TreeRef,
    pub backup_ref: BackupRef,
    /// Digest of the serialized `MemorySnapshot` in the CAS
    pub memory_digest: ContentDigest,
    pub metadata: CheckpointMetadata,
    pub created_at: DateTime<Utc>,
}

/// Append-only checkpoint catalog.
///
/// Semantics:
/// - `append` never overwrites; entries are immutable.
/// - `list` returns a project's entries oldest-first.
/// - Entries are only removed by an explicit `prune`.
#[async_trait]
pub trait CheckpointCatalog: Send + Sync {
    async fn append(&self, record: CheckpointRecord) -> StorageResult<()>;

    /// Returns `StorageError::CheckpointNotFound` if absent.
    async fn get(&self, id: &CheckpointId) -> StorageResult<CheckpointRecord>;

    async fn list(&self, project_id: &str) -> StorageResult<Vec<CheckpointRecord>>;

    /// Caller-driven retention. No-op if absent.
    async fn prune(&self, id: &CheckpointId) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// Versioned file tree and relational state
// ---------------------------------------------------------------------------

/// How a path differs between a snapshot and the live tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: FileChangeKind,
}

/// Versioned working tree of a project (a git repository in production).
#[async_trait]
pub trait FileTreeBackend: Send + Sync {
    /// Record the current working files and return a reference to them.
    async fn snapshot(&self, project_id: &str, message: &str) -> StorageResult<TreeRef>;

    /// Make the working files match `tree` again.
    async fn reset_to(&self, project_id: &str, tree: &TreeRef) -> StorageResult<()>;

    /// Paths whose live content differs from `tree`.
    async fn diff_since(&self, project_id: &str, tree: &TreeRef) -> StorageResult<Vec<FileChange>>;
}

/// Relational project state, used opaquely through backup/restore.
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    async fn backup(&self, project_id: &str) -> StorageResult<BackupRef>;

    async fn restore(&self, project_id: &str, backup: &BackupRef) -> StorageResult<()>;

    async fn has_backup(&self, backup: &BackupRef) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// CasStore: Content-Addressed Storage
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed blob store.
///
/// Guarantees:
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - `get(digest)` returns the exact bytes previously stored.
/// - Same content always yields the same digest (deduplication).
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Store bytes and return their content digest.
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Retrieve bytes by digest. Returns `StorageError::NotFound` if absent.
    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>>;

    /// Check whether a digest exists in the store.
    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool>;
}
