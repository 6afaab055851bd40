//! Flash save: checkpoint-then-archive compaction of one agent's memory.
//!
//! Phases run in order under the agent lock:
//! Idle -> Snapshotting -> Archiving -> Reporting.
//! A failed snapshot aborts before anything is archived.

use std::fmt;
use std::sync::Arc;

use ctxkeep_state::{AgentRef, CheckpointId, CheckpointTrigger, ItemId, MemoryItem, Tier};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::checkpoint::{CheckpointEngine, CheckpointRequest};
use crate::context::ContextStore;
use crate::error::{CtxKeepError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::runtime::CoreContext;
use crate::tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionPhase {
    Idle,
    Snapshotting,
    Archiving,
    Reporting,
}

impl fmt::Display for CompactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompactionPhase::Idle => "idle",
            CompactionPhase::Snapshotting => "snapshotting",
            CompactionPhase::Archiving => "archiving",
            CompactionPhase::Reporting => "reporting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionOutcome {
    Compacted,
    BelowThreshold,
    /// The budget source failed; treated as "not due"
    BudgetUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub agent: AgentRef,
    pub outcome: CompactionOutcome,
    pub checkpoint_id: Option<CheckpointId>,
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub items_archived: usize,
    pub reduction_pct: f64,
    pub hot_items_retained: usize,
    pub warm_items_retained: usize,
}

impl CompactionReport {
    fn noop(agent: &AgentRef, outcome: CompactionOutcome, tokens: u64) -> Self {
        Self {
            agent: agent.clone(),
            outcome,
            checkpoint_id: None,
            tokens_before: tokens,
            tokens_after: tokens,
            items_archived: 0,
            reduction_pct: 0.0,
            hot_items_retained: 0,
            warm_items_retained: 0,
        }
    }
}

#[derive(Clone)]
pub struct FlashSave {
    ctx: Arc<CoreContext>,
    store: ContextStore,
    engine: CheckpointEngine,
}

impl FlashSave {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self {
            store: ContextStore::new(ctx.clone()),
            engine: CheckpointEngine::new(ctx.clone()),
            ctx,
        }
    }

    /// Token level at which compaction is due, or a capacity error.
    fn trigger_level(&self) -> Result<(u64, f64)> {
        let budget = self.ctx.budget.current_budget()?;
        Ok((budget, self.ctx.config.compaction_threshold * budget as f64))
    }

    /// True when the agent's memory is at or over the threshold share of
    /// the budget. An unavailable budget counts as "not due".
    pub async fn should_compact(&self, agent: &AgentRef) -> Result<bool> {
        let tokens = self.store.token_count(agent).await?;
        match self.trigger_level() {
            Ok((_, level)) => Ok(tokens as f64 >= level),
            Err(e) => {
                warn!(agent = %agent, error = %e, "budget unavailable, compaction not due");
                Ok(false)
            }
        }
    }

    /// Rescore, then drop the COLD items. A failed rescore leaves every item.
    async fn archive_cold(&self, agent: &AgentRef) -> Result<(Vec<MemoryItem>, usize)> {
        let items = self.store.rescore_unlocked(agent).await?;
        let cold: Vec<ItemId> = items
            .iter()
            .filter(|i| i.tier == Tier::Cold)
            .map(|i| i.id.clone())
            .collect();
        let archived = self.store.remove_unlocked(agent, &cold).await?;
        Ok((items, archived))
    }

    /// Checkpoint the project, then archive every COLD item of `agent`.
    ///
    /// Below the threshold this is a no-op unless `force` is set. Concurrent
    /// calls for one agent run one after the other.
    #[instrument(skip(self), fields(agent = %agent))]
    pub async fn compact(&self, agent: &AgentRef, force: bool) -> Result<CompactionReport> {
        let _guard = self.ctx.locks.agent(agent).await;
        let label = agent.to_string();
        obs::emit_compaction_phase(&label, &CompactionPhase::Idle.to_string());

        let tokens_before = self.store.token_count_unlocked(agent).await?;
        let budget = match self.trigger_level() {
            Ok((budget, level)) => {
                if !force && (tokens_before as f64) < level {
                    return Ok(CompactionReport::noop(
                        agent,
                        CompactionOutcome::BelowThreshold,
                        tokens_before,
                    ));
                }
                budget
            }
            Err(e @ CtxKeepError::Capacity(_)) if !force => {
                warn!(error = %e, "budget unavailable, compaction not due");
                return Ok(CompactionReport::noop(
                    agent,
                    CompactionOutcome::BudgetUnavailable,
                    tokens_before,
                ));
            }
            Err(e @ CtxKeepError::Capacity(_)) => {
                warn!(error = %e, "budget unavailable, forcing compaction anyway");
                0
            }
            Err(e) => return Err(e),
        };
        obs::emit_compaction_started(&label, tokens_before, budget, force);

        obs::emit_compaction_phase(&label, &CompactionPhase::Snapshotting.to_string());
        let now = self.ctx.clock.now();
        let request = CheckpointRequest::new(
            agent.project_id.clone(),
            format!("Flash save {}", now.format("%Y-%m-%dT%H:%M:%SZ")),
        )
        .with_description(format!(
            "Automatic flash save of {} at {} tokens",
            agent.agent_id, tokens_before
        ))
        .with_trigger(CheckpointTrigger::Compaction);

        let checkpoint = match self.engine.create_unlocked(request).await {
            Ok(record) => record,
            Err(e) => {
                obs::emit_compaction_aborted(&label, &e);
                return Err(e);
            }
        };

        obs::emit_compaction_phase(&label, &CompactionPhase::Archiving.to_string());
        let (items, items_archived) = match self.archive_cold(agent).await {
            Ok(archived) => archived,
            Err(e) => {
                obs::emit_compaction_aborted(&label, &e);
                return Err(e);
            }
        };

        obs::emit_compaction_phase(&label, &CompactionPhase::Reporting.to_string());
        let retained: Vec<_> = items.iter().filter(|i| i.tier != Tier::Cold).collect();
        let tokens_after = tokens::total_tokens(retained.iter().copied());
        let reduction_pct = if tokens_before == 0 {
            0.0
        } else {
            tokens_before.saturating_sub(tokens_after) as f64 / tokens_before as f64 * 100.0
        };

        METRICS.inc_compactions();
        METRICS.add_items_archived(items_archived as u64);
        obs::emit_compaction_finished(
            &label,
            checkpoint.id.as_str(),
            tokens_before,
            tokens_after,
            items_archived,
        );

        Ok(CompactionReport {
            agent: agent.clone(),
            outcome: CompactionOutcome::Compacted,
            checkpoint_id: Some(checkpoint.id),
            tokens_before,
            tokens_after,
            items_archived,
            reduction_pct,
            hot_items_retained: retained.iter().filter(|i| i.tier == Tier::Hot).count(),
            warm_items_retained: retained.iter().filter(|i| i.tier == Tier::Warm).count(),
        })
    }
}
