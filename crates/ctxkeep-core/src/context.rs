//! Context Store: per-agent memory items with derived tiers.

use std::cmp::Ordering;
use std::sync::Arc;

use ctxkeep_state::{AgentRef, ItemId, ItemKind, MemoryItem, StorageError, Tier};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{CtxKeepError, Result};
use crate::runtime::CoreContext;
use crate::tiering::{self, TierCounts};
use crate::tokens;

/// Input for [`ContextStore::append`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub project_id: String,
    pub agent_id: String,
    pub kind: ItemKind,
    pub content: String,
}

impl NewItem {
    pub fn new(agent: &AgentRef, kind: impl Into<ItemKind>, content: impl Into<String>) -> Self {
        Self {
            project_id: agent.project_id.clone(),
            agent_id: agent.agent_id.clone(),
            kind: kind.into(),
            content: content.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(CtxKeepError::Validation(
                "project id must not be empty".to_string(),
            ));
        }
        if self.agent_id.trim().is_empty() {
            return Err(CtxKeepError::Validation(
                "agent id must not be empty".to_string(),
            ));
        }
        if self.kind.as_str().trim().is_empty() {
            return Err(CtxKeepError::Validation(
                "item kind must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    pub agent: AgentRef,
    pub total_items: usize,
    pub hot_count: usize,
    pub warm_count: usize,
    pub cold_count: usize,
    pub total_tokens: u64,
    /// `None` when the budget source is unavailable
    pub token_budget: Option<u64>,
    pub token_usage_pct: Option<f64>,
}

/// Orders by descending score, then most recent access.
fn by_importance(a: &MemoryItem, b: &MemoryItem) -> Ordering {
    b.importance_score
        .total_cmp(&a.importance_score)
        .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
}

#[derive(Clone)]
pub struct ContextStore {
    ctx: Arc<CoreContext>,
}

impl ContextStore {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    /// Add an item with a fresh id, zero accesses and an initial score.
    #[instrument(skip(self, item), fields(project = %item.project_id, agent = %item.agent_id, kind = %item.kind))]
    pub async fn append(&self, item: NewItem) -> Result<MemoryItem> {
        item.validate()?;
        let agent = AgentRef::new(item.project_id.clone(), item.agent_id.clone());
        let _guard = self.ctx.locks.agent(&agent).await;

        let now = self.ctx.clock.now();
        let mut stored = MemoryItem {
            id: ItemId::new(),
            project_id: item.project_id,
            agent_id: item.agent_id,
            kind: item.kind,
            content: item.content,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            importance_score: 0.0,
            tier: Tier::Cold,
        };
        let update = tiering::assess(&stored, now);
        stored.importance_score = update.importance_score;
        stored.tier = update.tier;

        self.ctx.backends.items.insert(stored.clone()).await?;
        debug!(item_id = %stored.id, tier = %stored.tier, "memory item appended");
        Ok(stored)
    }

    /// Count an access. The score is left alone until the next rescore.
    #[instrument(skip(self))]
    pub async fn record_access(&self, agent: &AgentRef, id: &ItemId) -> Result<MemoryItem> {
        let _guard = self.ctx.locks.agent(agent).await;
        self.owned_item(agent, id).await?;
        let touched = self
            .ctx
            .backends
            .items
            .touch(id, self.ctx.clock.now())
            .await?;
        Ok(touched)
    }

    /// Items of `agent` in `tier` (HOT and WARM when `None`), most important first.
    pub async fn load(
        &self,
        agent: &AgentRef,
        tier: Option<Tier>,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryItem>> {
        let _guard = self.ctx.locks.project_shared(&agent.project_id).await;
        let mut items: Vec<MemoryItem> = self
            .ctx
            .backends
            .items
            .list_agent(agent)
            .await?
            .into_iter()
            .map(|mut item| {
                item.tier = tiering::stored_tier(&item);
                item
            })
            .filter(|item| match tier {
                Some(t) => item.tier == t,
                None => item.tier != Tier::Cold,
            })
            .collect();

        items.sort_by(by_importance);
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    pub async fn get(&self, agent: &AgentRef, id: &ItemId) -> Result<MemoryItem> {
        let _guard = self.ctx.locks.project_shared(&agent.project_id).await;
        let mut item = self.owned_item(agent, id).await?;
        item.tier = tiering::stored_tier(&item);
        Ok(item)
    }

    pub async fn token_count(&self, agent: &AgentRef) -> Result<u64> {
        let _guard = self.ctx.locks.project_shared(&agent.project_id).await;
        self.token_count_unlocked(agent).await
    }

    pub(crate) async fn token_count_unlocked(&self, agent: &AgentRef) -> Result<u64> {
        let items = self.ctx.backends.items.list_agent(agent).await?;
        Ok(tokens::total_tokens(&items))
    }

    /// Recompute and persist every score and tier of `agent` in one batch.
    #[instrument(skip(self))]
    pub async fn rescore(&self, agent: &AgentRef) -> Result<Vec<MemoryItem>> {
        let _guard = self.ctx.locks.agent(agent).await;
        self.rescore_unlocked(agent).await
    }

    pub(crate) async fn rescore_unlocked(&self, agent: &AgentRef) -> Result<Vec<MemoryItem>> {
        let mut items = self.ctx.backends.items.list_agent(agent).await?;
        let updates = tiering::rescore_all(&mut items, self.ctx.clock.now());
        self.ctx.backends.items.update_scores(&updates).await?;
        debug!(count = updates.len(), "rescored memory items");
        Ok(items)
    }

    pub async fn stats(&self, agent: &AgentRef) -> Result<ContextStats> {
        let _guard = self.ctx.locks.project_shared(&agent.project_id).await;
        let items = self.ctx.backends.items.list_agent(agent).await?;
        let counts = TierCounts::tally(&items);
        let total_tokens = tokens::total_tokens(&items);

        let token_budget = match self.ctx.budget.current_budget() {
            Ok(budget) => Some(budget),
            Err(e) => {
                warn!(error = %e, "token budget unavailable for stats");
                None
            }
        };
        let token_usage_pct = token_budget.map(|b| total_tokens as f64 / b as f64 * 100.0);

        Ok(ContextStats {
            agent: agent.clone(),
            total_items: items.len(),
            hot_count: counts.hot,
            warm_count: counts.warm,
            cold_count: counts.cold,
            total_tokens,
            token_budget,
            token_usage_pct,
        })
    }

    /// Drop every item of `agent`.
    #[instrument(skip(self))]
    pub async fn clear(&self, agent: &AgentRef) -> Result<usize> {
        let _guard = self.ctx.locks.agent(agent).await;
        let ids: Vec<ItemId> = self
            .ctx
            .backends
            .items
            .list_agent(agent)
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect();
        let removed = self.remove_unlocked(agent, &ids).await?;
        info!(removed, "agent memory cleared");
        Ok(removed)
    }

    /// Archive path used by flash save; callers hold the agent lock.
    pub(crate) async fn remove_unlocked(&self, agent: &AgentRef, ids: &[ItemId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let owned: Vec<ItemId> = self
            .ctx
            .backends
            .items
            .list_agent(agent)
            .await?
            .into_iter()
            .map(|i| i.id)
            .filter(|id| ids.contains(id))
            .collect();
        Ok(self.ctx.backends.items.delete(&owned).await?)
    }

    async fn owned_item(&self, agent: &AgentRef, id: &ItemId) -> Result<MemoryItem> {
        let not_found = || CtxKeepError::NotFound(format!("memory item {id} in {agent}"));
        match self.ctx.backends.items.get(id).await {
            Ok(item) if item.belongs_to(agent) => Ok(item),
            Ok(_) | Err(StorageError::ItemNotFound { .. }) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CoreConfig;
    use crate::runtime::Backends;
    use chrono::{Duration, Utc};
    use ctxkeep_state::fakes::*;

    fn store() -> (ContextStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backends = Backends {
            items: Arc::new(MemoryItemStore::new()),
            catalog: Arc::new(MemoryCheckpointCatalog::new()),
            file_tree: Arc::new(MemoryFileTree::new()),
            relational: Arc::new(MemoryRelationalBackend::new()),
            cas: Arc::new(MemoryCasStore::new()),
        };
        let ctx = CoreContext::new(backends, CoreConfig::default()).with_clock(clock.clone());
        (ContextStore::new(Arc::new(ctx)), clock)
    }

    #[tokio::test]
    async fn append_assigns_initial_score() {
        let (store, _) = store();
        let agent = AgentRef::new("proj", "backend-001");
        let item = store
            .append(NewItem::new(&agent, "TASK", "implement login"))
            .await
            .unwrap();
        assert_eq!(item.access_count, 0);
        assert_eq!(item.created_at, item.last_accessed_at);
        assert_eq!(item.importance_score, 0.8);
        assert_eq!(item.tier, Tier::Hot);
    }

    #[tokio::test]
    async fn append_rejects_empty_fields() {
        let (store, _) = store();
        for (project, agent, kind) in [("", "a", "TASK"), ("p", " ", "TASK"), ("p", "a", "")] {
            let item = NewItem {
                project_id: project.to_string(),
                agent_id: agent.to_string(),
                kind: ItemKind::from(kind),
                content: "x".to_string(),
            };
            assert!(matches!(
                store.append(item).await,
                Err(CtxKeepError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn record_access_does_not_rescore() {
        let (store, clock) = store();
        let agent = AgentRef::new("proj", "qa-001");
        let item = store
            .append(NewItem::new(&agent, ItemKind::TestResult, "2 failures"))
            .await
            .unwrap();
        clock.advance(Duration::minutes(10));

        let touched = store.record_access(&agent, &item.id).await.unwrap();
        assert_eq!(touched.access_count, 1);
        assert!(touched.last_accessed_at > item.last_accessed_at);
        assert_eq!(touched.importance_score, item.importance_score);
    }

    #[tokio::test]
    async fn record_access_is_namespaced() {
        let (store, _) = store();
        let owner = AgentRef::new("proj", "backend-001");
        let other = AgentRef::new("proj", "frontend-001");
        let item = store
            .append(NewItem::new(&owner, ItemKind::Code, "fn x() {}"))
            .await
            .unwrap();

        assert!(matches!(
            store.record_access(&other, &item.id).await,
            Err(CtxKeepError::NotFound(_))
        ));
        assert!(matches!(
            store
                .record_access(&owner, &ItemId("missing".to_string()))
                .await,
            Err(CtxKeepError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn load_defaults_to_hot_and_warm_ordered() {
        let (store, clock) = store();
        let agent = AgentRef::new("proj", "backend-001");
        store
            .append(NewItem::new(&agent, ItemKind::SpecSection, "old spec"))
            .await
            .unwrap();
        clock.advance(Duration::days(5));
        let code = store
            .append(NewItem::new(&agent, ItemKind::Code, "code"))
            .await
            .unwrap();
        let task = store
            .append(NewItem::new(&agent, ItemKind::Task, "task"))
            .await
            .unwrap();
        store.rescore(&agent).await.unwrap();

        let loaded = store.load(&agent, None, None).await.unwrap();
        let ids: Vec<&ItemId> = loaded.iter().map(|i| &i.id).collect();
        assert_eq!(ids, vec![&task.id, &code.id]);

        let cold = store.load(&agent, Some(Tier::Cold), None).await.unwrap();
        assert_eq!(cold.len(), 1);
        assert_eq!(cold[0].content, "old spec");

        let limited = store.load(&agent, None, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, task.id);
    }

    #[tokio::test]
    async fn token_count_rounds_each_item_up() {
        let (store, _) = store();
        let agent = AgentRef::new("proj", "backend-001");
        store
            .append(NewItem::new(&agent, ItemKind::Code, "12345"))
            .await
            .unwrap();
        store
            .append(NewItem::new(&agent, ItemKind::Code, "1234"))
            .await
            .unwrap();
        assert_eq!(store.token_count(&agent).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn stats_reports_usage() {
        let (store, _) = store();
        let agent = AgentRef::new("proj", "backend-001");
        store
            .append(NewItem::new(&agent, ItemKind::Task, "x".repeat(7_200)))
            .await
            .unwrap();
        let stats = store.stats(&agent).await.unwrap();
        assert_eq!(stats.total_items, 1);
        assert_eq!(stats.hot_count, 1);
        assert_eq!(stats.total_tokens, 1_800);
        assert_eq!(stats.token_budget, Some(180_000));
        assert!((stats.token_usage_pct.unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn clear_only_touches_one_agent() {
        let (store, _) = store();
        let a = AgentRef::new("proj", "a");
        let b = AgentRef::new("proj", "b");
        store.append(NewItem::new(&a, "TASK", "a1")).await.unwrap();
        store.append(NewItem::new(&a, "TASK", "a2")).await.unwrap();
        store.append(NewItem::new(&b, "TASK", "b1")).await.unwrap();

        assert_eq!(store.clear(&a).await.unwrap(), 2);
        assert_eq!(store.token_count(&a).await.unwrap(), 0);
        assert_eq!(store.load(&b, None, None).await.unwrap().len(), 1);
    }
}
