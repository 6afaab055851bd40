//! SurrealDB Handle - Connection and Operations
//!
//! `SurrealHandle` is the durable backend for ctxkeep. It implements
//! [`ItemStore`], [`CheckpointCatalog`] and [`RelationalBackend`] on a single
//! connection, and exposes the `project_state` key/value table that the
//! relational backup covers.
//!
//! Supports in-memory, local (SurrealKV) and cloud (WebSocket) connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{
    CheckpointRow, MemoryItemRow, ProjectStateEntry, ProjectStateRow, ScoreUpdateRow,
    StateBackupRow,
};
use crate::storage_traits::{
    AgentRef, BackupRef, CheckpointCatalog, CheckpointId, CheckpointRecord, ItemId, ItemStore,
    MemoryItem, RelationalBackend, ScoreUpdate, StorageResult,
};
use crate::Result;

const DEFAULT_NAMESPACE: &str = "ctxkeep";
const DEFAULT_DATABASE: &str = "main";

/// Configuration for SurrealDB Cloud connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Namespace (default: "ctxkeep")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new cloud configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "ctxkeep")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// SurrealDB connection handle for ctxkeep
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// Connect to SurrealDB in-memory and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        info!("Connecting to SurrealDB (in-memory)");
        Self::connect_url("mem://").await
    }

    /// Connect to an arbitrary SurrealDB URL (`mem://`, `surrealkv://path`, `ws://host`)
    #[instrument]
    pub async fn connect_url(url: &str) -> Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealDB connected and schema initialized");
        Ok(SurrealHandle { db })
    }

    /// Connect to SurrealDB Cloud
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn setup_cloud(config: CloudConfig) -> Result<Self> {
        info!("Connecting to SurrealDB Cloud (root={})", config.is_root);

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root authentication failed: {e}")))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Database authentication failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {e}"))
            })?;

        migrations::init_schema(&db).await?;
        info!("SurrealDB Cloud connected and schema initialized");
        Ok(SurrealHandle { db })
    }

    /// Connect using environment variables
    ///
    /// If SURREALDB_ENDPOINT is set, connects to cloud.
    /// If SURREALDB_URL is set, connects to that URL.
    /// Otherwise, persists locally with SurrealKV under `local_dir`.
    #[instrument(skip_all)]
    pub async fn setup_from_env(local_dir: &std::path::Path) -> Result<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            info!("Cloud config found, connecting to SurrealDB Cloud");
            return Self::setup_cloud(config).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            info!("SURREALDB_URL found, connecting to {}", url);
            return Self::connect_url(&url).await;
        }

        std::fs::create_dir_all(local_dir).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                local_dir.display(),
                e
            ))
        })?;
        let url = format!("surrealkv://{}", local_dir.display());
        info!("No cloud config or SURREALDB_URL found, using local persistence: {}", url);
        Self::connect_url(&url).await
    }

    // ========== Project State Operations ==========

    /// Set one key of a project's relational state
    #[instrument(skip(self, value))]
    pub async fn put_project_state(&self, project_id: &str, key: &str, value: &str) -> Result<()> {
        debug!("Saving project state");

        let row = ProjectStateRow {
            id: None,
            project_id: project_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now(),
        };

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE project_state WHERE project_id = $project AND key = $key; \
                 CREATE project_state CONTENT $row; \
                 COMMIT TRANSACTION;",
            )
            .bind(("project", project_id.to_string()))
            .bind(("key", key.to_string()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    /// Read one key of a project's relational state
    #[instrument(skip(self))]
    pub async fn get_project_state(&self, project_id: &str, key: &str) -> Result<Option<String>> {
        let mut result = self
            .db
            .query("SELECT * FROM project_state WHERE project_id = $project AND key = $key")
            .bind(("project", project_id.to_string()))
            .bind(("key", key.to_string()))
            .await?;

        let rows: Vec<ProjectStateRow> = result.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.value))
    }

    async fn project_state_rows(&self, project_id: &str) -> StorageResult<Vec<ProjectStateRow>> {
        let mut result = self
            .db
            .query("SELECT * FROM project_state WHERE project_id = $project ORDER BY key ASC")
            .bind(("project", project_id.to_string()))
            .await
            .map_err(backend)?;

        result.take(0).map_err(backend)
    }
}

// ========== ItemStore ==========

#[async_trait]
impl ItemStore for SurrealHandle {
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    async fn insert(&self, item: MemoryItem) -> StorageResult<()> {
        let row = MemoryItemRow::from(&item);
        self.db
            .query("CREATE memory_items CONTENT $row")
            .bind(("row", row))
            .await
            .and_then(|r| r.check())
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, id: &ItemId) -> StorageResult<MemoryItem> {
        let mut result = self
            .db
            .query("SELECT * FROM memory_items WHERE item_id = $id")
            .bind(("id", id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryItemRow> = result.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::ItemNotFound {
                item_id: id.0.clone(),
            })
            .and_then(MemoryItem::try_from)
    }

    async fn touch(&self, id: &ItemId, at: DateTime<Utc>) -> StorageResult<MemoryItem> {
        let mut result = self
            .db
            .query(
                "UPDATE memory_items SET access_count += 1, last_accessed_at = $at \
                 WHERE item_id = $id RETURN AFTER",
            )
            .bind(("id", id.0.clone()))
            .bind(("at", SurrealDatetime::from(at)))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryItemRow> = result.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::ItemNotFound {
                item_id: id.0.clone(),
            })
            .and_then(MemoryItem::try_from)
    }

    async fn list_agent(&self, agent: &AgentRef) -> StorageResult<Vec<MemoryItem>> {
        let mut result = self
            .db
            .query("SELECT * FROM memory_items WHERE project_id = $project AND agent_id = $agent")
            .bind(("project", agent.project_id.clone()))
            .bind(("agent", agent.agent_id.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryItemRow> = result.take(0).map_err(backend)?;
        rows.into_iter().map(MemoryItem::try_from).collect()
    }

    async fn list_project(&self, project_id: &str) -> StorageResult<Vec<MemoryItem>> {
        let mut result = self
            .db
            .query("SELECT * FROM memory_items WHERE project_id = $project")
            .bind(("project", project_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<MemoryItemRow> = result.take(0).map_err(backend)?;
        rows.into_iter().map(MemoryItem::try_from).collect()
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_scores(&self, updates: &[ScoreUpdate]) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let rows: Vec<ScoreUpdateRow> = updates.iter().map(ScoreUpdateRow::from).collect();

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 FOR $u IN $updates { \
                     UPDATE memory_items SET importance_score = $u.importance_score, tier = $u.tier \
                     WHERE item_id = $u.item_id; \
                 }; \
                 COMMIT TRANSACTION;",
            )
            .bind(("updates", rows))
            .await
            .and_then(|r| r.check())
            .map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete(&self, ids: &[ItemId]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let id_strings: Vec<String> = ids.iter().map(|i| i.0.clone()).collect();

        let mut result = self
            .db
            .query("DELETE memory_items WHERE item_id IN $ids RETURN BEFORE")
            .bind(("ids", id_strings))
            .await
            .map_err(backend)?;

        let deleted: Vec<MemoryItemRow> = result.take(0).map_err(backend)?;
        Ok(deleted.len())
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn replace_project(&self, project_id: &str, items: Vec<MemoryItem>) -> StorageResult<()> {
        let rows: Vec<MemoryItemRow> = items.iter().map(MemoryItemRow::from).collect();

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE memory_items WHERE project_id = $project; \
                 FOR $row IN $rows { CREATE memory_items CONTENT $row; }; \
                 COMMIT TRANSACTION;",
            )
            .bind(("project", project_id.to_string()))
            .bind(("rows", rows))
            .await
            .and_then(|r| r.check())
            .map_err(backend)?;

        info!(project_id, "Replaced project memory set");
        Ok(())
    }
}

// ========== CheckpointCatalog ==========

#[async_trait]
impl CheckpointCatalog for SurrealHandle {
    #[instrument(skip(self, record), fields(checkpoint_id = %record.id))]
    async fn append(&self, record: CheckpointRecord) -> StorageResult<()> {
        let row = CheckpointRow::try_from(&record)?;
        self.db
            .query("CREATE checkpoints CONTENT $row")
            .bind(("row", row))
            .await
            .and_then(|r| r.check())
            .map_err(backend)?;
        debug!("Checkpoint catalogued");
        Ok(())
    }

    async fn get(&self, id: &CheckpointId) -> StorageResult<CheckpointRecord> {
        let mut result = self
            .db
            .query("SELECT * FROM checkpoints WHERE checkpoint_id = $id")
            .bind(("id", id.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<CheckpointRow> = result.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::CheckpointNotFound {
                checkpoint_id: id.0.clone(),
            })
            .and_then(CheckpointRecord::try_from)
    }

    async fn list(&self, project_id: &str) -> StorageResult<Vec<CheckpointRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM checkpoints WHERE project_id = $project ORDER BY created_at ASC")
            .bind(("project", project_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<CheckpointRow> = result.take(0).map_err(backend)?;
        rows.into_iter().map(CheckpointRecord::try_from).collect()
    }

    async fn prune(&self, id: &CheckpointId) -> StorageResult<()> {
        self.db
            .query("DELETE checkpoints WHERE checkpoint_id = $id")
            .bind(("id", id.0.clone()))
            .await
            .and_then(|r| r.check())
            .map_err(backend)?;
        Ok(())
    }
}

// ========== RelationalBackend ==========

#[async_trait]
impl RelationalBackend for SurrealHandle {
    #[instrument(skip(self))]
    async fn backup(&self, project_id: &str) -> StorageResult<BackupRef> {
        let entries: Vec<ProjectStateEntry> = self
            .project_state_rows(project_id)
            .await?
            .into_iter()
            .map(ProjectStateEntry::from)
            .collect();

        let backup = BackupRef(uuid::Uuid::new_v4().to_string());
        let row = StateBackupRow {
            id: None,
            backup_id: backup.0.clone(),
            project_id: project_id.to_string(),
            payload: serde_json::to_string(&entries)?,
            created_at: Utc::now(),
        };

        self.db
            .query("CREATE state_backups CONTENT $row")
            .bind(("row", row))
            .await
            .and_then(|r| r.check())
            .map_err(backend)?;

        info!(backup_id = %backup, rows = entries.len(), "Project state backed up");
        Ok(backup)
    }

    #[instrument(skip(self))]
    async fn restore(&self, project_id: &str, backup: &BackupRef) -> StorageResult<()> {
        let mut result = self
            .db
            .query("SELECT * FROM state_backups WHERE backup_id = $id")
            .bind(("id", backup.0.clone()))
            .await
            .map_err(backend)?;

        let rows: Vec<StateBackupRow> = result.take(0).map_err(backend)?;
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::BackupNotFound {
                backup_id: backup.0.clone(),
            })?;

        let entries: Vec<ProjectStateEntry> = serde_json::from_str(&stored.payload)?;
        let state_rows: Vec<ProjectStateRow> = entries
            .into_iter()
            .map(|e| e.into_row(project_id))
            .collect();

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE project_state WHERE project_id = $project; \
                 FOR $row IN $rows { CREATE project_state CONTENT $row; }; \
                 COMMIT TRANSACTION;",
            )
            .bind(("project", project_id.to_string()))
            .bind(("rows", state_rows))
            .await
            .and_then(|r| r.check())
            .map_err(backend)?;

        info!(backup_id = %backup, "Project state restored");
        Ok(())
    }

    async fn has_backup(&self, backup: &BackupRef) -> StorageResult<bool> {
        let mut result = self
            .db
            .query("SELECT backup_id FROM state_backups WHERE backup_id = $id")
            .bind(("id", backup.0.clone()))
            .await
            .map_err(backend)?;

        #[derive(serde::Deserialize)]
        struct Found {
            #[allow(dead_code)]
            backup_id: String,
        }

        let found: Vec<Found> = result.take(0).map_err(backend)?;
        Ok(!found.is_empty())
    }
}
