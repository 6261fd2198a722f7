//! Domain models for Bandscore.
//!
//! Canonical definitions for the core entities:
//! - `EssaySubmission`: the caller's input
//! - `CriterionResult`: one criterion's score and comment
//! - `EvaluationRecord`: the aggregated, deliverable evaluation
//! - `Band`: a 0–9 score in half-band steps

pub mod band;
pub mod criterion;
pub mod error;
pub mod record;
pub mod submission;

// Re-export main types and errors
pub use band::Band;
pub use criterion::{Criterion, CriterionResult, CriterionStatus};
pub use error::{
    ConfigError, DelegateError, DelegateResult, EvaluationError, EvaluationResult,
    ValidationError,
};
pub use record::{AuditStatus, EvaluationRecord, QualityVerdict, RecordStatus};
pub use submission::{EssaySubmission, EssayType, ExamType, TaskNumber};
