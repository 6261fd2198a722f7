//! Bandscore Core Library
//!
//! Re-exports the evaluation engine: domain model, delegates, the four
//! criterion evaluators, aggregation, gap analysis and the quality auditor.

pub mod aggregator;
pub mod auditor;
pub mod config;
pub mod delegate;
pub mod describer;
pub mod domain;
pub mod evaluator;
pub mod fakes;
pub mod gap;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod prompt;
pub mod rubric;
pub mod telemetry;

pub use domain::{
    AuditStatus, Band, ConfigError, Criterion, CriterionResult, CriterionStatus, DelegateError,
    DelegateResult, EssaySubmission, EssayType, EvaluationError, EvaluationRecord,
    EvaluationResult, ExamType, QualityVerdict, RecordStatus, TaskNumber, ValidationError,
};

pub use aggregator::{aggregate, AggregationPolicy};
pub use auditor::{
    read_audit_artifact, write_audit_artifact, ArtifactError, AuditReport, AuditSink,
    FileAuditSink, QualityAuditor, TracingAuditSink,
};
pub use config::{AuditConfig, EngineConfig, ModelSpec, ModelTable, RetryPolicy};
pub use delegate::{
    Capability, Completion, GenerationRequest, ImageToText, TextGenerator, TokenUsage,
};
pub use describer::VisualContext;
pub use evaluator::{CriterionEvaluator, EvaluationContext};
pub use gap::{GapAnalysisGenerator, GapPlan};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, WorkflowState};
pub use rubric::{JsonRubricProvider, RubricExcerpt, RubricProvider};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
