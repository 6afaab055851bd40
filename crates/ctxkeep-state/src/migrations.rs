//! SurrealDB schema migrations and initialization
//!
//! Sets up all ctxkeep tables with their indexes. Every definition uses
//! `IF NOT EXISTS`, so running it against an existing database is a no-op.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all ctxkeep tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing ctxkeep SurrealDB schema");

    init_memory_items_table(db).await?;
    init_checkpoints_table(db).await?;
    init_project_state_tables(db).await?;

    info!("ctxkeep schema initialization complete");
    Ok(())
}

/// Initialize `memory_items`
///
/// Schema:
/// ```text
/// TABLE memory_items {
///   item_id:           STRING (unique)
///   project_id:        STRING (indexed with agent_id)
///   agent_id:          STRING
///   kind:              STRING
///   content:           STRING
///   created_at:        DATETIME
///   last_accessed_at:  DATETIME
///   access_count:      INT
///   importance_score:  FLOAT (derived cache)
///   tier:              STRING (derived cache: hot | warm | cold)
/// }
/// ```
async fn init_memory_items_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing memory_items table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memory_items SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_item_id ON TABLE memory_items COLUMNS item_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_item_namespace ON TABLE memory_items COLUMNS project_id, agent_id;
    "#;

    db.query(sql)
        .await
        .and_then(|r| r.check())
        .map_err(|e| StateError::SchemaSetup(format!("memory_items: {e}")))?;
    Ok(())
}

/// Initialize `checkpoints`
///
/// Constraints:
/// - `checkpoint_id` is unique
/// - rows are never updated (enforced via app logic)
async fn init_checkpoints_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing checkpoints table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS checkpoints SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_checkpoint_id ON TABLE checkpoints COLUMNS checkpoint_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_checkpoint_project ON TABLE checkpoints COLUMNS project_id, created_at;
    "#;

    db.query(sql)
        .await
        .and_then(|r| r.check())
        .map_err(|e| StateError::SchemaSetup(format!("checkpoints: {e}")))?;
    Ok(())
}

/// Initialize `project_state` and `state_backups`
async fn init_project_state_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing project_state and state_backups tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS project_state SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_state_key ON TABLE project_state COLUMNS project_id, key UNIQUE;

        DEFINE TABLE IF NOT EXISTS state_backups SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_backup_id ON TABLE state_backups COLUMNS backup_id UNIQUE;
    "#;

    db.query(sql)
        .await
        .and_then(|r| r.check())
        .map_err(|e| StateError::SchemaSetup(format!("project_state: {e}")))?;
    Ok(())
}
