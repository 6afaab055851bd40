//! Shared engine context: backends, clock, budget, config and locks.

use std::sync::Arc;

use ctxkeep_state::{
    CasStore, CheckpointCatalog, FileTreeBackend, ItemStore, RelationalBackend, SurrealHandle,
};

use crate::clock::{BudgetSource, Clock, FixedBudget, SystemClock};
use crate::config::CoreConfig;
use crate::locks::LockRegistry;

/// The five storage seams the engine runs against.
#[derive(Clone)]
pub struct Backends {
    pub items: Arc<dyn ItemStore>,
    pub catalog: Arc<dyn CheckpointCatalog>,
    pub file_tree: Arc<dyn FileTreeBackend>,
    pub relational: Arc<dyn RelationalBackend>,
    pub cas: Arc<dyn CasStore>,
}

impl Backends {
    /// SurrealDB for items, catalog and relational state.
    pub fn surreal(
        handle: SurrealHandle,
        file_tree: Arc<dyn FileTreeBackend>,
        cas: Arc<dyn CasStore>,
    ) -> Self {
        let handle = Arc::new(handle);
        Self {
            items: handle.clone(),
            catalog: handle.clone(),
            relational: handle,
            file_tree,
            cas,
        }
    }
}

pub struct CoreContext {
    pub backends: Backends,
    pub clock: Arc<dyn Clock>,
    pub budget: Arc<dyn BudgetSource>,
    pub config: CoreConfig,
    pub locks: LockRegistry,
}

impl CoreContext {
    /// System clock and a fixed budget taken from `config`.
    pub fn new(backends: Backends, config: CoreConfig) -> Self {
        Self {
            backends,
            clock: Arc::new(SystemClock),
            budget: Arc::new(FixedBudget(config.token_budget)),
            config,
            locks: LockRegistry::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_budget(mut self, budget: Arc<dyn BudgetSource>) -> Self {
        self.budget = budget;
        self
    }
}
