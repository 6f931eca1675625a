//! Structured observability hooks for the orchestration pipeline.
//!
//! Lifecycle events are emitted at `info!` (failures at `warn!`) with a
//! stable `event` field so they can be filtered in JSON log output.

use tracing::{info, warn};

/// RAII guard that enters a query-scoped span for the duration of a run.
///
/// ```ignore
/// let _span = QuerySpan::enter("3f2a...");
/// // dispatch, evaluation and apply logs now carry query_id
/// ```
pub struct QuerySpan {
    _span: tracing::span::EnteredSpan,
}

impl QuerySpan {
    /// Create and enter a span tagged with the query id.
    pub fn enter(query_id: &str) -> Self {
        let span = tracing::info_span!("orchestra.query", query_id = %query_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a fan-out started.
pub fn emit_dispatch_started(purpose: &str, agents: usize) {
    info!(event = "dispatch.started", purpose = %purpose, agents = agents);
}

/// Emit event: an agent answered within its budget.
pub fn emit_agent_finished(agent: &str, purpose: &str, elapsed_ms: u64, bytes: usize) {
    info!(
        event = "agent.finished",
        agent = %agent,
        purpose = %purpose,
        elapsed_ms = elapsed_ms,
        bytes = bytes,
    );
}

/// Emit event: an agent invocation failed (non-fatal).
pub fn emit_agent_failed(agent: &str, purpose: &str, failure: &dyn std::fmt::Display) {
    warn!(event = "agent.failed", agent = %agent, purpose = %purpose, failure = %failure);
}

/// Emit event: a peer score was recorded.
pub fn emit_evaluation_scored(evaluator: &str, author: &str, score: f64) {
    info!(
        event = "evaluation.scored",
        evaluator = %evaluator,
        author = %author,
        score = score,
    );
}

/// Emit event: a backup was committed to disk.
pub fn emit_backup_created(backup_id: &str, entries: usize) {
    info!(event = "backup.created", backup_id = %backup_id, entries = entries);
}

/// Emit event: an apply finished without errors.
pub fn emit_apply_finished(applied: usize, dry_run: bool) {
    info!(event = "apply.finished", applied = applied, dry_run = dry_run);
}

/// Emit event: an apply failed and the backup was restored.
pub fn emit_apply_rolled_back(failed_path: &str, reverted: usize, unreverted: usize) {
    warn!(
        event = "apply.rolled_back",
        failed_path = %failed_path,
        reverted = reverted,
        unreverted = unreverted,
    );
}
