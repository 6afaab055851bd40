//! Structured observability hooks for compaction, checkpoint and restore
//! lifecycle events.
//!
//! Events are emitted at `info!` (failures at `warn!`) with an `event` field
//! naming the transition, so they can be filtered in JSON log pipelines.

use tracing::{info, warn};

/// RAII guard that enters a project-scoped tracing span.
pub struct ProjectSpan {
    _span: tracing::span::EnteredSpan,
}

impl ProjectSpan {
    pub fn enter(project_id: &str) -> Self {
        let span = tracing::info_span!("ctxkeep.project", project_id = %project_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a compaction phase began.
pub fn emit_compaction_phase(agent: &str, phase: &str) {
    info!(event = "compaction.phase", agent = %agent, phase = %phase);
}

pub fn emit_compaction_started(agent: &str, tokens: u64, budget: u64, forced: bool) {
    info!(
        event = "compaction.started",
        agent = %agent,
        tokens = tokens,
        budget = budget,
        forced = forced,
    );
}

pub fn emit_compaction_finished(
    agent: &str,
    checkpoint_id: &str,
    tokens_before: u64,
    tokens_after: u64,
    items_archived: usize,
) {
    info!(
        event = "compaction.finished",
        agent = %agent,
        checkpoint_id = %checkpoint_id,
        tokens_before = tokens_before,
        tokens_after = tokens_after,
        items_archived = items_archived,
    );
}

/// Emit event: compaction gave up without reducing memory (warning level).
pub fn emit_compaction_aborted(agent: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "compaction.aborted",
        agent = %agent,
        error = %error,
        "no reduction performed"
    );
}

pub fn emit_checkpoint_created(project_id: &str, checkpoint_id: &str, name: &str, trigger: &str) {
    info!(
        event = "checkpoint.created",
        project_id = %project_id,
        checkpoint_id = %checkpoint_id,
        name = %name,
        trigger = %trigger,
    );
}

pub fn emit_checkpoint_failed(project_id: &str, step: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "checkpoint.failed",
        project_id = %project_id,
        step = %step,
        error = %error,
    );
}

pub fn emit_restore_step_completed(project_id: &str, checkpoint_id: &str, step: &str) {
    info!(
        event = "restore.step_completed",
        project_id = %project_id,
        checkpoint_id = %checkpoint_id,
        step = %step,
    );
}

pub fn emit_restore_failed(
    project_id: &str,
    checkpoint_id: &str,
    step: &str,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "restore.failed",
        project_id = %project_id,
        checkpoint_id = %checkpoint_id,
        step = %step,
        error = %error,
    );
}

pub fn emit_restore_applied(project_id: &str, checkpoint_id: &str, items_restored: usize) {
    info!(
        event = "restore.applied",
        project_id = %project_id,
        checkpoint_id = %checkpoint_id,
        items_restored = items_restored,
    );
}
