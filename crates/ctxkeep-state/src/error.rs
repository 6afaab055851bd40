//! Error types for ctxkeep-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the SurrealDB backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits.
///
/// Every backend (SurrealDB, git, filesystem CAS, in-memory fakes) maps its
/// native failures into one of these variants at the trait boundary.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A CAS blob was not found
    #[error("blob not found: {digest}")]
    NotFound { digest: String },

    /// A memory item was not found
    #[error("memory item not found: {item_id}")]
    ItemNotFound { item_id: String },

    /// A checkpoint was not found in the catalog
    #[error("checkpoint not found: {checkpoint_id}")]
    CheckpointNotFound { checkpoint_id: String },

    /// A relational backup artifact was not found
    #[error("relational backup not found: {backup_id}")]
    BackupNotFound { backup_id: String },

    /// A digest string was malformed
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// The versioned file tree rejected an operation
    #[error("file tree error: {0}")]
    FileTree(String),

    /// Payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure (connection, query, I/O)
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
