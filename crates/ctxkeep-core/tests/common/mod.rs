//! Shared harness for ctxkeep-core integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use ctxkeep_core::{
    AgentRef, Backends, BudgetSource, CoreConfig, CoreContext, CtxKeepError, ItemKind,
    ManualClock, MemoryItem, MemoryService, NewItem,
};
use ctxkeep_state::fakes::{
    MemoryCasStore, MemoryCheckpointCatalog, MemoryFileTree, MemoryItemStore,
    MemoryRelationalBackend,
};
use ctxkeep_state::{FileChange, FileTreeBackend, StorageResult, TreeRef};
use tokio::sync::Notify;

pub const PROJECT: &str = "proj";

/// Tokens per scenario item: ten of them make 85% of a 180k budget.
pub const SCENARIO_ITEM_TOKENS: u64 = 15_300;

pub fn agent() -> AgentRef {
    AgentRef::new(PROJECT, "backend-001")
}

pub fn content_with_tokens(tokens: u64) -> String {
    "x".repeat((tokens * 4) as usize)
}

pub struct Harness {
    pub items: Arc<MemoryItemStore>,
    pub catalog: Arc<MemoryCheckpointCatalog>,
    pub files: Arc<MemoryFileTree>,
    pub relational: Arc<MemoryRelationalBackend>,
    pub cas: Arc<MemoryCasStore>,
    pub clock: Arc<ManualClock>,
    pub service: MemoryService,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(CoreConfig::default(), None, None)
    }

    pub fn with_config(config: CoreConfig) -> Self {
        Self::build(config, None, None)
    }

    pub fn with_budget(budget: Arc<dyn BudgetSource>) -> Self {
        Self::build(CoreConfig::default(), None, Some(budget))
    }

    /// File tree operations pause for `delay` and signal when entered.
    pub fn with_slow_tree(config: CoreConfig, delay: Duration) -> (Self, Arc<SlowFileTree>) {
        let files = Arc::new(MemoryFileTree::new());
        let slow = Arc::new(SlowFileTree {
            inner: files.clone(),
            delay,
            snapshot_entered: Notify::new(),
            reset_entered: Notify::new(),
        });
        let harness = Self::assemble(config, files, slow.clone(), None);
        (harness, slow)
    }

    fn build(
        config: CoreConfig,
        tree: Option<Arc<dyn FileTreeBackend>>,
        budget: Option<Arc<dyn BudgetSource>>,
    ) -> Self {
        let files = Arc::new(MemoryFileTree::new());
        let tree = tree.unwrap_or_else(|| files.clone() as Arc<dyn FileTreeBackend>);
        Self::assemble(config, files, tree, budget)
    }

    fn assemble(
        config: CoreConfig,
        files: Arc<MemoryFileTree>,
        tree: Arc<dyn FileTreeBackend>,
        budget: Option<Arc<dyn BudgetSource>>,
    ) -> Self {
        let items = Arc::new(MemoryItemStore::new());
        let catalog = Arc::new(MemoryCheckpointCatalog::new());
        let relational = Arc::new(MemoryRelationalBackend::new());
        let cas = Arc::new(MemoryCasStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let backends = Backends {
            items: items.clone(),
            catalog: catalog.clone(),
            file_tree: tree,
            relational: relational.clone(),
            cas: cas.clone(),
        };
        let mut ctx = CoreContext::new(backends, config).with_clock(clock.clone());
        if let Some(budget) = budget {
            ctx = ctx.with_budget(budget);
        }

        Self {
            items,
            catalog,
            files,
            relational,
            cas,
            clock,
            service: MemoryService::new(ctx),
        }
    }

    pub async fn append(&self, agent: &AgentRef, kind: ItemKind, content: String) -> MemoryItem {
        self.service
            .append(NewItem::new(agent, kind, content))
            .await
            .unwrap()
    }

    /// Two COLD spec sections (five days old) and eight fresh HOT tasks,
    /// 153,000 tokens in total.
    pub async fn seed_scenario(&self, agent: &AgentRef) -> (Vec<MemoryItem>, Vec<MemoryItem>) {
        let mut cold = Vec::new();
        for _ in 0..2 {
            cold.push(
                self.append(
                    agent,
                    ItemKind::SpecSection,
                    content_with_tokens(SCENARIO_ITEM_TOKENS),
                )
                .await,
            );
        }
        self.clock.advance(ChronoDuration::days(5));
        let mut hot = Vec::new();
        for _ in 0..8 {
            hot.push(
                self.append(agent, ItemKind::Task, content_with_tokens(SCENARIO_ITEM_TOKENS))
                    .await,
            );
        }
        (hot, cold)
    }
}

/// Budget source that always fails.
pub struct UnavailableBudget;

impl BudgetSource for UnavailableBudget {
    fn current_budget(&self) -> ctxkeep_core::Result<u64> {
        Err(CtxKeepError::Capacity("budget service unreachable".to_string()))
    }
}

/// File tree that stalls before delegating to an in-memory tree.
pub struct SlowFileTree {
    pub inner: Arc<MemoryFileTree>,
    pub delay: Duration,
    pub snapshot_entered: Notify,
    pub reset_entered: Notify,
}

#[async_trait]
impl FileTreeBackend for SlowFileTree {
    async fn snapshot(&self, project_id: &str, message: &str) -> StorageResult<TreeRef> {
        self.snapshot_entered.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.snapshot(project_id, message).await
    }

    async fn reset_to(&self, project_id: &str, tree: &TreeRef) -> StorageResult<()> {
        self.reset_entered.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.reset_to(project_id, tree).await
    }

    async fn diff_since(&self, project_id: &str, tree: &TreeRef) -> StorageResult<Vec<FileChange>> {
        self.inner.diff_since(project_id, tree).await
    }
}
