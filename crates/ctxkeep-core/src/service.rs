//! `MemoryService`: the operations ctxkeep exposes to its callers.

use std::sync::Arc;

use futures::future::try_join_all;

use ctxkeep_state::{
    AgentRef, CheckpointId, CheckpointRecord, CheckpointTrigger, ItemId, MemoryItem, Tier,
};

use crate::checkpoint::{CheckpointEngine, CheckpointRequest, RestoreOutcome};
use crate::compaction::{CompactionReport, FlashSave};
use crate::context::{ContextStats, ContextStore, NewItem};
use crate::error::Result;
use crate::runtime::CoreContext;

#[derive(Clone)]
pub struct MemoryService {
    ctx: Arc<CoreContext>,
    store: ContextStore,
    engine: CheckpointEngine,
    flash: FlashSave,
}

impl MemoryService {
    pub fn new(ctx: CoreContext) -> Self {
        Self::from_shared(Arc::new(ctx))
    }

    pub fn from_shared(ctx: Arc<CoreContext>) -> Self {
        Self {
            store: ContextStore::new(ctx.clone()),
            engine: CheckpointEngine::new(ctx.clone()),
            flash: FlashSave::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn engine(&self) -> &CheckpointEngine {
        &self.engine
    }

    pub async fn append(&self, item: NewItem) -> Result<MemoryItem> {
        self.store.append(item).await
    }

    pub async fn record_access(&self, agent: &AgentRef, id: &ItemId) -> Result<MemoryItem> {
        self.store.record_access(agent, id).await
    }

    pub async fn items(
        &self,
        agent: &AgentRef,
        tier: Option<Tier>,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryItem>> {
        self.store.load(agent, tier, limit).await
    }

    pub async fn stats(&self, agent: &AgentRef) -> Result<ContextStats> {
        self.store.stats(agent).await
    }

    /// Stats for several agents, gathered concurrently. Fails if any agent fails.
    pub async fn stats_many(&self, agents: &[AgentRef]) -> Result<Vec<ContextStats>> {
        try_join_all(agents.iter().map(|agent| self.store.stats(agent))).await
    }

    pub async fn rescore(&self, agent: &AgentRef) -> Result<Vec<MemoryItem>> {
        self.store.rescore(agent).await
    }

    pub async fn should_compact(&self, agent: &AgentRef) -> Result<bool> {
        self.flash.should_compact(agent).await
    }

    pub async fn compact(&self, agent: &AgentRef, force: bool) -> Result<CompactionReport> {
        self.flash.compact(agent, force).await
    }

    pub async fn checkpoint(
        &self,
        project_id: &str,
        name: &str,
        description: Option<&str>,
        trigger: CheckpointTrigger,
    ) -> Result<CheckpointRecord> {
        let mut request = CheckpointRequest::new(project_id, name).with_trigger(trigger);
        if let Some(description) = description {
            request = request.with_description(description);
        }
        self.engine.create(request).await
    }

    pub async fn checkpoints(&self, project_id: &str) -> Result<Vec<CheckpointRecord>> {
        self.engine.list(project_id).await
    }

    pub async fn checkpoints_newest_first(
        &self,
        project_id: &str,
    ) -> Result<Vec<CheckpointRecord>> {
        self.engine.list_desc(project_id).await
    }

    pub async fn checkpoint_record(
        &self,
        project_id: &str,
        checkpoint_id: &CheckpointId,
    ) -> Result<CheckpointRecord> {
        self.engine.get(project_id, checkpoint_id).await
    }

    /// Drop a checkpoint from the catalog; its artifacts stay where they are.
    pub async fn delete_checkpoint(
        &self,
        project_id: &str,
        checkpoint_id: &CheckpointId,
    ) -> Result<()> {
        self.engine.prune(project_id, checkpoint_id).await
    }

    pub async fn restore(
        &self,
        project_id: &str,
        checkpoint_id: &CheckpointId,
        preview: bool,
    ) -> Result<RestoreOutcome> {
        self.engine.restore(project_id, checkpoint_id, preview).await
    }
}
