//! Row definitions for the ctxkeep SurrealDB tables
//!
//! Tables:
//! - memory_items: one row per active memory item
//! - checkpoints: the append-only checkpoint catalog
//! - project_state: relational project state (key/value per project)
//! - state_backups: serialized `project_state` backups referenced by checkpoints
//!
//! Rows are converted to and from the `storage_traits` types at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{
    BackupRef, CheckpointId, CheckpointMetadata, CheckpointRecord, ContentDigest, ItemId,
    ItemKind, MemoryItem, ScoreUpdate, TreeRef,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row in `memory_items`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItemRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub item_id: String,
    pub project_id: String,
    pub agent_id: String,
    pub kind: String,
    pub content: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub importance_score: f64,
    pub tier: String,
}

impl From<&MemoryItem> for MemoryItemRow {
    fn from(item: &MemoryItem) -> Self {
        MemoryItemRow {
            id: None,
            item_id: item.id.0.clone(),
            project_id: item.project_id.clone(),
            agent_id: item.agent_id.clone(),
            kind: item.kind.as_str().to_string(),
            content: item.content.clone(),
            created_at: item.created_at,
            last_accessed_at: item.last_accessed_at,
            access_count: item.access_count,
            importance_score: item.importance_score,
            tier: item.tier.as_str().to_string(),
        }
    }
}

impl TryFrom<MemoryItemRow> for MemoryItem {
    type Error = StorageError;

    fn try_from(row: MemoryItemRow) -> Result<Self, Self::Error> {
        let tier = row.tier.parse().map_err(StorageError::Serialization)?;
        Ok(MemoryItem {
            id: ItemId(row.item_id),
            project_id: row.project_id,
            agent_id: row.agent_id,
            kind: ItemKind::from(row.kind),
            content: row.content,
            created_at: row.created_at,
            last_accessed_at: row.last_accessed_at,
            access_count: row.access_count,
            importance_score: row.importance_score,
            tier,
        })
    }
}

/// Bound parameter for batched score updates
#[derive(Debug, Clone, Serialize)]
pub struct ScoreUpdateRow {
    pub item_id: String,
    pub importance_score: f64,
    pub tier: String,
}

impl From<&ScoreUpdate> for ScoreUpdateRow {
    fn from(update: &ScoreUpdate) -> Self {
        ScoreUpdateRow {
            item_id: update.item_id.0.clone(),
            importance_score: update.importance_score,
            tier: update.tier.as_str().to_string(),
        }
    }
}

/// Row in `checkpoints`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub checkpoint_id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger: String,
    pub tree_ref: String,
    pub backup_ref: String,
    pub memory_digest: String,
    /// `CheckpointMetadata` encoded as JSON text
    pub metadata_json: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&CheckpointRecord> for CheckpointRow {
    type Error = StorageError;

    fn try_from(record: &CheckpointRecord) -> Result<Self, Self::Error> {
        Ok(CheckpointRow {
            id: None,
            checkpoint_id: record.id.0.clone(),
            project_id: record.project_id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            trigger: record.trigger.as_str().to_string(),
            tree_ref: record.tree_ref.0.clone(),
            backup_ref: record.backup_ref.0.clone(),
            memory_digest: record.memory_digest.as_str().to_string(),
            metadata_json: serde_json::to_string(&record.metadata)?,
            created_at: record.created_at,
        })
    }
}

impl TryFrom<CheckpointRow> for CheckpointRecord {
    type Error = StorageError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let metadata: CheckpointMetadata = serde_json::from_str(&row.metadata_json)?;
        Ok(CheckpointRecord {
            id: CheckpointId(row.checkpoint_id),
            project_id: row.project_id,
            name: row.name,
            description: row.description,
            trigger: row.trigger.parse().map_err(StorageError::Serialization)?,
            tree_ref: TreeRef(row.tree_ref),
            backup_ref: BackupRef(row.backup_ref),
            memory_digest: ContentDigest::try_from(row.memory_digest)?,
            metadata,
            created_at: row.created_at,
        })
    }
}

/// Row in `project_state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStateRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub project_id: String,
    pub key: String,
    pub value: String,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Backup payload entry, serialized as plain JSON inside `state_backups.payload`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStateEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl From<ProjectStateRow> for ProjectStateEntry {
    fn from(row: ProjectStateRow) -> Self {
        ProjectStateEntry {
            key: row.key,
            value: row.value,
            updated_at: row.updated_at,
        }
    }
}

impl ProjectStateEntry {
    pub fn into_row(self, project_id: &str) -> ProjectStateRow {
        ProjectStateRow {
            id: None,
            project_id: project_id.to_string(),
            key: self.key,
            value: self.value,
            updated_at: self.updated_at,
        }
    }
}

/// Row in `state_backups`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateBackupRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub backup_id: String,
    pub project_id: String,
    /// JSON array of `ProjectStateEntry`
    pub payload: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::{CheckpointTrigger, Tier};

    fn sample_item() -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            id: ItemId::new(),
            project_id: "proj".to_string(),
            agent_id: "backend-001".to_string(),
            kind: ItemKind::SpecSection,
            content: "design notes".to_string(),
            created_at: now,
            last_accessed_at: now,
            access_count: 3,
            importance_score: 0.55,
            tier: Tier::Warm,
        }
    }

    #[test]
    fn memory_item_row_roundtrip() {
        let item = sample_item();
        let row = MemoryItemRow::from(&item);
        assert_eq!(row.kind, "SPEC_SECTION");
        assert_eq!(row.tier, "warm");
        let back = MemoryItem::try_from(row).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn memory_item_row_with_bad_tier_fails() {
        let mut row = MemoryItemRow::from(&sample_item());
        row.tier = "tepid".to_string();
        assert!(matches!(
            MemoryItem::try_from(row),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn checkpoint_row_keeps_metadata() {
        let record = CheckpointRecord {
            id: CheckpointId::new(),
            project_id: "proj".to_string(),
            name: "before refactor".to_string(),
            description: None,
            trigger: CheckpointTrigger::PhaseTransition,
            tree_ref: TreeRef("abc123".to_string()),
            backup_ref: BackupRef("b-1".to_string()),
            memory_digest: ContentDigest::from_bytes(b"dump"),
            metadata: CheckpointMetadata {
                agents_active: vec!["a".to_string(), "b".to_string()],
                context_items_count: 4,
                total_tokens: 100,
                hot_count: 1,
                warm_count: 2,
                cold_count: 1,
            },
            created_at: Utc::now(),
        };
        let row = CheckpointRow::try_from(&record).unwrap();
        assert_eq!(row.trigger, "phase_transition");
        let back = CheckpointRecord::try_from(row).unwrap();
        assert_eq!(back, record);
    }
}
