//! Structured tracing events for the evaluation lifecycle.

use std::sync::Arc;

use bandscore_core::fakes::{ScriptedGenerator, ScriptedImageToText};
use bandscore_core::obs::{
    emit_aggregation, emit_audit_failed, emit_criterion_finished, emit_evaluation_finished,
    emit_evaluation_started, emit_state_transition, EvaluationSpan,
};
use bandscore_core::{
    Band, Criterion, CriterionStatus, EngineConfig, EssaySubmission, EssayType, Orchestrator,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_lifecycle_events_are_emitted() {
    let _span = EvaluationSpan::enter("trk-obs-001");
    emit_evaluation_started("trk-obs-001", 4, 260);
    emit_state_transition("trk-obs-001", "init", "evaluating_criteria");
    emit_criterion_finished("trk-obs-001", Criterion::Grammar, CriterionStatus::Degraded, 5);
    emit_aggregation("trk-obs-001", 1, 1, true);
    emit_evaluation_finished("trk-obs-001", 1200, true, Some("abc123"));

    assert!(logs_contain("evaluation.started"));
    assert!(logs_contain("evaluating_criteria"));
    assert!(logs_contain("criterion.finished"));
    assert!(logs_contain("trk-obs-001"));
}

#[traced_test]
#[test]
fn test_audit_failure_logs_warning() {
    emit_audit_failed("trk-obs-002", &"disk full");
    assert!(logs_contain("disk full"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_evaluation_logs_state_transitions() {
    let gen = Arc::new(ScriptedGenerator::scoring(&Criterion::ALL.map(|c| (c, 7.0))));
    let orch = Orchestrator::builder(EngineConfig::default())
        .generator(gen)
        .image_to_text(Arc::new(ScriptedImageToText::failing()))
        .build()
        .unwrap();
    let submission = EssaySubmission::new(
        "trk-obs-003",
        "Discuss the advantages of remote work.",
        "Remote work gives employees flexibility and removes long commutes. ".repeat(20),
        EssayType::GeneralTask2,
        Band::new(7.0).unwrap(),
    );

    orch.evaluate(submission).await.unwrap();

    assert!(logs_contain("generating_gaps"));
    assert!(logs_contain("evaluation.finished"));
}
