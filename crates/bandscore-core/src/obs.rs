//! Structured observability hooks for the evaluation lifecycle.
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{info, warn};

use crate::domain::{Criterion, CriterionStatus};

/// RAII guard that enters a submission-scoped span.
///
/// ```ignore
/// let _span = EvaluationSpan::enter("track-001");
/// // tracing calls on this thread now carry track_id = "track-001"
/// ```
pub struct EvaluationSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvaluationSpan {
    pub fn enter(track_id: &str) -> Self {
        Self {
            _span: span(track_id).entered(),
        }
    }
}

/// Span for one submission, for use with `Instrument` across await points.
pub fn span(track_id: &str) -> tracing::Span {
    tracing::info_span!("bandscore.evaluation", track_id = %track_id)
}

pub fn emit_evaluation_started(track_id: &str, essay_type: u8, word_count: usize) {
    info!(
        event = "evaluation.started",
        track_id = %track_id,
        essay_type = essay_type,
        word_count = word_count,
    );
}

pub fn emit_state_transition(track_id: &str, from: &str, to: &str) {
    info!(event = "evaluation.transition", track_id = %track_id, from = from, to = to);
}

pub fn emit_criterion_finished(
    track_id: &str,
    criterion: Criterion,
    status: CriterionStatus,
    attempts: u32,
) {
    info!(
        event = "criterion.finished",
        track_id = %track_id,
        criterion = %criterion,
        status = ?status,
        attempts = attempts,
    );
}

pub fn emit_aggregation(track_id: &str, unhealthy: usize, threshold: usize, deliverable: bool) {
    info!(
        event = "evaluation.aggregated",
        track_id = %track_id,
        unhealthy = unhealthy,
        threshold = threshold,
        deliverable = deliverable,
    );
}

pub fn emit_audit_finished(track_id: &str, overall_quality: Option<f64>, flagged: usize) {
    info!(
        event = "audit.finished",
        track_id = %track_id,
        overall_quality = ?overall_quality,
        flagged = flagged,
    );
}

/// Emit event: audit could not complete (warning level, never fatal).
pub fn emit_audit_failed(track_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.failed", track_id = %track_id, error = %error);
}

pub fn emit_evaluation_finished(track_id: &str, duration_ms: u64, success: bool, digest: Option<&str>) {
    info!(
        event = "evaluation.finished",
        track_id = %track_id,
        duration_ms = duration_ms,
        success = success,
        digest = digest.unwrap_or(""),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_span_create() {
        let _span = EvaluationSpan::enter("track-001");
        emit_state_transition("track-001", "init", "evaluating_criteria");
    }
}
