use std::collections::BTreeSet;
use std::sync::Arc;

use ctxkeep_state::{
    CheckpointId, CheckpointMetadata, CheckpointRecord, CheckpointTrigger, MemoryItem,
    StorageError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{
    diff_memory, MemorySnapshot, RestoreOutcome, RestorePreview, RestoreReport, RestoreStep,
    SnapshotStep, MEMORY_SNAPSHOT_FORMAT,
};
use crate::error::{CtxKeepError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::runtime::CoreContext;
use crate::tiering::TierCounts;
use crate::tokens;

/// Input for [`CheckpointEngine::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger: CheckpointTrigger,
}

impl CheckpointRequest {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
            description: None,
            trigger: CheckpointTrigger::Manual,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_trigger(mut self, trigger: CheckpointTrigger) -> Self {
        self.trigger = trigger;
        self
    }
}

fn failed_at(step: SnapshotStep) -> impl Fn(StorageError) -> CtxKeepError {
    move |e| CtxKeepError::SnapshotFailure {
        step,
        reason: e.to_string(),
    }
}

fn summarize(items: &[MemoryItem]) -> CheckpointMetadata {
    let agents: BTreeSet<&str> = items.iter().map(|i| i.agent_id.as_str()).collect();
    let counts = TierCounts::tally(items);
    CheckpointMetadata {
        agents_active: agents.into_iter().map(str::to_string).collect(),
        context_items_count: items.len(),
        total_tokens: tokens::total_tokens(items),
        hot_count: counts.hot,
        warm_count: counts.warm,
        cold_count: counts.cold,
    }
}

#[derive(Clone)]
pub struct CheckpointEngine {
    ctx: Arc<CoreContext>,
}

impl CheckpointEngine {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    fn validate(&self, request: &CheckpointRequest) -> Result<()> {
        let config = &self.ctx.config;
        if request.project_id.trim().is_empty() {
            return Err(CtxKeepError::Validation(
                "project id must not be empty".to_string(),
            ));
        }
        if request.name.trim().is_empty() {
            return Err(CtxKeepError::Validation(
                "checkpoint name must not be empty".to_string(),
            ));
        }
        if request.name.chars().count() > config.max_name_len {
            return Err(CtxKeepError::Validation(format!(
                "checkpoint name longer than {} characters",
                config.max_name_len
            )));
        }
        if let Some(description) = &request.description {
            if description.chars().count() > config.max_description_len {
                return Err(CtxKeepError::Validation(format!(
                    "checkpoint description longer than {} characters",
                    config.max_description_len
                )));
            }
        }
        Ok(())
    }

    /// Snapshot the file tree, relational state and memory of a project.
    ///
    /// Returns [`CtxKeepError::SnapshotFailure`] naming the failed step; the
    /// catalog only gains an entry when every step succeeded.
    #[instrument(skip(self, request), fields(project = %request.project_id, name = %request.name, trigger = %request.trigger))]
    pub async fn create(&self, request: CheckpointRequest) -> Result<CheckpointRecord> {
        self.validate(&request)?;
        let _guard = self.ctx.locks.project_shared(&request.project_id).await;
        self.create_unlocked(request).await
    }

    /// Callers hold the project lock, shared or exclusive. Name and
    /// description limits are not checked here; they apply to caller input
    /// through [`Self::create`].
    pub(crate) async fn create_unlocked(
        &self,
        request: CheckpointRequest,
    ) -> Result<CheckpointRecord> {
        let project_id = request.project_id.clone();
        let timeout = self.ctx.config.snapshot_timeout;

        let result = match tokio::time::timeout(timeout, self.run_snapshot(request)).await {
            Ok(result) => result,
            Err(_) => Err(CtxKeepError::Timeout(timeout)),
        };

        match &result {
            Ok(record) => {
                METRICS.inc_checkpoints();
                obs::emit_checkpoint_created(
                    &project_id,
                    record.id.as_str(),
                    &record.name,
                    record.trigger.as_str(),
                );
            }
            Err(e) => {
                METRICS.inc_snapshot_failures();
                let step = match e {
                    CtxKeepError::SnapshotFailure { step, .. } => step.as_str(),
                    CtxKeepError::Timeout(_) => "timeout",
                    _ => "unknown",
                };
                obs::emit_checkpoint_failed(&project_id, step, e);
            }
        }
        result
    }

    async fn run_snapshot(&self, request: CheckpointRequest) -> Result<CheckpointRecord> {
        let backends = &self.ctx.backends;
        let project_id = request.project_id.as_str();

        let tree_ref = backends
            .file_tree
            .snapshot(project_id, &format!("Checkpoint: {}", request.name))
            .await
            .map_err(failed_at(SnapshotStep::FileTree))?;
        debug!(tree_ref = %tree_ref.short(), "file tree captured");

        let backup_ref = backends
            .relational
            .backup(project_id)
            .await
            .map_err(failed_at(SnapshotStep::Relational))?;
        debug!(backup_ref = %backup_ref, "relational state backed up");

        let items = backends
            .items
            .list_project(project_id)
            .await
            .map_err(failed_at(SnapshotStep::Memory))?;
        let metadata = summarize(&items);
        let snapshot = MemorySnapshot {
            format_version: MEMORY_SNAPSHOT_FORMAT,
            project_id: project_id.to_string(),
            exported_at: self.ctx.clock.now(),
            items,
        };
        let payload = serde_json::to_vec(&snapshot).map_err(|e| CtxKeepError::SnapshotFailure {
            step: SnapshotStep::Memory,
            reason: e.to_string(),
        })?;
        let memory_digest = backends
            .cas
            .put(&payload)
            .await
            .map_err(failed_at(SnapshotStep::Memory))?;
        debug!(digest = %memory_digest.short(), bytes = payload.len(), "memory dump stored");

        let record = CheckpointRecord {
            id: CheckpointId::new(),
            project_id: project_id.to_string(),
            name: request.name,
            description: request.description,
            trigger: request.trigger,
            tree_ref,
            backup_ref,
            memory_digest,
            metadata,
            created_at: self.ctx.clock.now(),
        };
        backends
            .catalog
            .append(record.clone())
            .await
            .map_err(failed_at(SnapshotStep::Catalog))?;

        Ok(record)
    }

    /// Checkpoints of a project, oldest first.
    pub async fn list(&self, project_id: &str) -> Result<Vec<CheckpointRecord>> {
        Ok(self.ctx.backends.catalog.list(project_id).await?)
    }

    /// Checkpoints of a project, newest first.
    pub async fn list_desc(&self, project_id: &str) -> Result<Vec<CheckpointRecord>> {
        let mut records = self.list(project_id).await?;
        records.reverse();
        Ok(records)
    }

    pub async fn get(&self, project_id: &str, id: &CheckpointId) -> Result<CheckpointRecord> {
        let not_found =
            || CtxKeepError::NotFound(format!("checkpoint {id} in project {project_id}"));
        match self.ctx.backends.catalog.get(id).await {
            Ok(record) if record.project_id == project_id => Ok(record),
            Ok(_) | Err(StorageError::CheckpointNotFound { .. }) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a catalog entry. Its artifacts are left in place.
    #[instrument(skip(self))]
    pub async fn prune(&self, project_id: &str, id: &CheckpointId) -> Result<()> {
        let _guard = self.ctx.locks.project_shared(project_id).await;
        self.get(project_id, id).await?;
        self.ctx.backends.catalog.prune(id).await?;
        info!(checkpoint_id = %id, "checkpoint pruned");
        Ok(())
    }

    /// Preview or apply a checkpoint.
    ///
    /// Both modes first check that the checkpoint belongs to the project and
    /// that its memory dump and relational backup still exist. Applying
    /// holds the project lock exclusively and rejects a concurrent restore of
    /// the same project with [`CtxKeepError::ConcurrencyConflict`].
    #[instrument(skip(self))]
    pub async fn restore(
        &self,
        project_id: &str,
        checkpoint_id: &CheckpointId,
        preview: bool,
    ) -> Result<RestoreOutcome> {
        if preview {
            let _guard = self.ctx.locks.project_shared(project_id).await;
            let (record, snapshot) = self.load_validated(project_id, checkpoint_id).await?;
            let preview = self.preview_against(&record, &snapshot).await?;
            return Ok(RestoreOutcome::Preview(preview));
        }

        let _slot = self.ctx.locks.begin_restore(project_id)?;
        let _guard = self.ctx.locks.project_exclusive(project_id).await;
        let (record, snapshot) = self.load_validated(project_id, checkpoint_id).await?;
        let report = self.apply(record, snapshot).await?;
        Ok(RestoreOutcome::Applied(report))
    }

    async fn load_validated(
        &self,
        project_id: &str,
        id: &CheckpointId,
    ) -> Result<(CheckpointRecord, MemorySnapshot)> {
        let record = self.get(project_id, id).await?;
        let backends = &self.ctx.backends;

        if !backends.cas.contains(&record.memory_digest).await? {
            return Err(CtxKeepError::ArtifactMissing(format!(
                "memory dump {} of checkpoint {}",
                record.memory_digest.short(),
                record.id
            )));
        }
        if !backends.relational.has_backup(&record.backup_ref).await? {
            return Err(CtxKeepError::ArtifactMissing(format!(
                "relational backup {} of checkpoint {}",
                record.backup_ref, record.id
            )));
        }

        let payload = match backends.cas.get(&record.memory_digest).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound { digest }) => {
                return Err(CtxKeepError::ArtifactMissing(format!("memory dump {digest}")))
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: MemorySnapshot = serde_json::from_slice(&payload)?;
        if snapshot.format_version != MEMORY_SNAPSHOT_FORMAT {
            return Err(CtxKeepError::Validation(format!(
                "unsupported memory snapshot format {}",
                snapshot.format_version
            )));
        }
        if snapshot.project_id != project_id {
            return Err(CtxKeepError::Validation(format!(
                "memory dump of checkpoint {} belongs to project {}",
                record.id, snapshot.project_id
            )));
        }
        Ok((record, snapshot))
    }

    async fn preview_against(
        &self,
        record: &CheckpointRecord,
        snapshot: &MemorySnapshot,
    ) -> Result<RestorePreview> {
        let backends = &self.ctx.backends;
        let file_changes = backends
            .file_tree
            .diff_since(&record.project_id, &record.tree_ref)
            .await?;
        let live = backends.items.list_project(&record.project_id).await?;
        let (items_added, items_removed, items_modified) = diff_memory(&live, &snapshot.items);

        Ok(RestorePreview {
            checkpoint_id: record.id.clone(),
            checkpoint_name: record.name.clone(),
            file_changes,
            items_added,
            items_removed,
            items_modified,
        })
    }

    async fn apply(
        &self,
        record: CheckpointRecord,
        snapshot: MemorySnapshot,
    ) -> Result<RestoreReport> {
        let backends = &self.ctx.backends;
        let project_id = record.project_id.clone();
        let checkpoint_id = record.id.to_string();
        let items_restored = snapshot.items.len();
        let mut items = Some(snapshot.items);
        let mut completed = Vec::with_capacity(RestoreStep::ALL.len());

        for step in RestoreStep::ALL {
            let outcome = match step {
                RestoreStep::FileTree => {
                    backends
                        .file_tree
                        .reset_to(&project_id, &record.tree_ref)
                        .await
                }
                RestoreStep::Relational => {
                    backends
                        .relational
                        .restore(&project_id, &record.backup_ref)
                        .await
                }
                RestoreStep::Memory => {
                    backends
                        .items
                        .replace_project(&project_id, items.take().unwrap_or_default())
                        .await
                }
            };

            if let Err(e) = outcome {
                obs::emit_restore_failed(&project_id, &checkpoint_id, step.as_str(), &e);
                let remaining = RestoreStep::ALL
                    .iter()
                    .copied()
                    .skip(completed.len() + 1)
                    .collect();
                return Err(CtxKeepError::RestoreFailure {
                    failed_step: step,
                    completed,
                    remaining,
                    reason: e.to_string(),
                });
            }
            obs::emit_restore_step_completed(&project_id, &checkpoint_id, step.as_str());
            completed.push(step);
        }

        METRICS.inc_restores();
        obs::emit_restore_applied(&project_id, &checkpoint_id, items_restored);
        Ok(RestoreReport {
            checkpoint: record,
            completed_steps: completed,
            items_restored,
            restored_at: self.ctx.clock.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::runtime::Backends;
    use ctxkeep_state::fakes::*;

    fn engine() -> CheckpointEngine {
        let backends = Backends {
            items: Arc::new(MemoryItemStore::new()),
            catalog: Arc::new(MemoryCheckpointCatalog::new()),
            file_tree: Arc::new(MemoryFileTree::new()),
            relational: Arc::new(MemoryRelationalBackend::new()),
            cas: Arc::new(MemoryCasStore::new()),
        };
        CheckpointEngine::new(Arc::new(CoreContext::new(backends, CoreConfig::default())))
    }

    #[tokio::test]
    async fn name_limits_are_enforced() {
        let engine = engine();
        for request in [
            CheckpointRequest::new("proj", ""),
            CheckpointRequest::new("proj", "n".repeat(101)),
            CheckpointRequest::new("proj", "ok").with_description("d".repeat(501)),
            CheckpointRequest::new("", "ok"),
        ] {
            assert!(matches!(
                engine.create(request).await,
                Err(CtxKeepError::Validation(_))
            ));
        }
        let at_limits =
            CheckpointRequest::new("proj", "n".repeat(100)).with_description("d".repeat(500));
        assert!(engine.create(at_limits).await.is_ok());
    }

    #[tokio::test]
    async fn empty_project_snapshot_has_empty_metadata() {
        let engine = engine();
        let record = engine
            .create(CheckpointRequest::new("proj", "empty").with_trigger(CheckpointTrigger::Pause))
            .await
            .unwrap();
        assert_eq!(record.metadata, CheckpointMetadata::default());
        assert_eq!(record.trigger, CheckpointTrigger::Pause);
        assert_eq!(engine.list("proj").await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn get_rejects_other_projects() {
        let engine = engine();
        let record = engine
            .create(CheckpointRequest::new("proj", "mine"))
            .await
            .unwrap();
        assert!(matches!(
            engine.get("other", &record.id).await,
            Err(CtxKeepError::NotFound(_))
        ));
        assert!(matches!(
            engine.restore("other", &record.id, true).await,
            Err(CtxKeepError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn prune_removes_catalog_entry() {
        let engine = engine();
        let record = engine
            .create(CheckpointRequest::new("proj", "temp"))
            .await
            .unwrap();
        engine.prune("proj", &record.id).await.unwrap();
        assert!(engine.list("proj").await.unwrap().is_empty());
    }
}
