//! ctxkeep-state: Storage Layer for ctxkeep
//!
//! This crate owns every byte ctxkeep persists: memory items, the checkpoint
//! catalog, relational project state and its backups. It defines the storage
//! traits the engine is written against and ships SurrealDB and in-memory
//! implementations of them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: Data integrity and transactional batch writes.
//!
//! ## Key Components
//!
//! - `SurrealHandle`: Manages connection and implements `ItemStore`,
//!   `CheckpointCatalog` and `RelationalBackend`
//! - `storage_traits`: The seams the engine depends on
//! - `fakes`: In-memory implementations with failure injection for tests

mod error;
pub mod fakes;
mod handle;
mod migrations;
mod schema;
pub mod storage_traits;

pub use error::{StateError, StorageError};
pub use handle::{CloudConfig, SurrealHandle};
pub use storage_traits::{
    AgentRef, BackupRef, CasStore, CheckpointCatalog, CheckpointId, CheckpointMetadata,
    CheckpointRecord, CheckpointTrigger, ContentDigest, FileChange, FileChangeKind,
    FileTreeBackend, ItemId, ItemKind, ItemStore, MemoryItem, RelationalBackend, ScoreUpdate,
    StorageResult, Tier, TreeRef,
};

/// Result type for ctxkeep-state operations
pub type Result<T> = std::result::Result<T, StateError>;
