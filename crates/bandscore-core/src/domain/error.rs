//! Error taxonomy for Bandscore.
//!
//! Delegate-level failures ([`DelegateError`]) are always contained inside the
//! workflow and downgraded to degraded or missing criteria. Only
//! [`EvaluationError`] reaches the caller of `evaluate`.

use crate::domain::criterion::Criterion;

/// Errors produced by submission validation.
///
/// Raised before any delegate is invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("track id must be at least 3 characters, got {len}")]
    TrackIdTooShort { len: usize },

    #[error("question text must not be empty")]
    EmptyQuestion,

    #[error("essay text must not be empty")]
    EmptyEssay,

    #[error("unknown essay type: {value}")]
    UnknownEssayType { value: String },

    #[error("band must be between 0 and 9 in half-band steps, got {value}")]
    InvalidBand { value: String },

    #[error("unknown criterion: {value}")]
    UnknownCriterion { value: String },
}

/// Fatal configuration errors. The process cannot serve requests while one is present.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("rubric data missing for {criterion} / {essay_type}")]
    MissingRubric { criterion: String, essay_type: String },

    #[error("rubric data invalid: {0}")]
    InvalidRubric(String),

    #[error("missing credential {variable} required by model {model}")]
    MissingCredential { variable: String, model: String },

    #[error("unsupported model {model}: expected a 'gpt-' or 'gemini-' prefix")]
    UnsupportedModel { model: String },

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A single failed call to an external delegate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DelegateError {
    #[error("delegate call timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("delegate unavailable: {0}")]
    Unavailable(String),

    #[error("malformed delegate output: {0}")]
    Malformed(String),

    #[error("delegate rejected request: {0}")]
    Rejected(String),
}

impl DelegateError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DelegateError::Rejected(_))
    }
}

/// Caller-facing failure of one `evaluate` call.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "{unhealthy} criteria degraded or missing (threshold {threshold}): degraded={degraded:?} missing={missing:?}"
    )]
    Aggregation {
        unhealthy: usize,
        threshold: usize,
        degraded: Vec<Criterion>,
        missing: Vec<Criterion>,
    },

    #[error("evaluation exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Result type for delegate calls.
pub type DelegateResult<T> = std::result::Result<T, DelegateError>;

/// Result type for `evaluate`.
pub type EvaluationResult<T> = std::result::Result<T, EvaluationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::TrackIdTooShort { len: 1 };
        assert!(err.to_string().contains("at least 3 characters"));

        let err = ValidationError::InvalidBand {
            value: "9.7".to_string(),
        };
        assert!(err.to_string().contains("9.7"));
    }

    #[test]
    fn test_rejected_is_not_retryable() {
        assert!(!DelegateError::Rejected("not an image".into()).is_retryable());
        assert!(DelegateError::Timeout { after_ms: 10 }.is_retryable());
        assert!(DelegateError::Malformed("no json".into()).is_retryable());
        assert!(DelegateError::Unavailable("503".into()).is_retryable());
    }

    #[test]
    fn test_aggregation_error_lists_criteria() {
        let err = EvaluationError::Aggregation {
            unhealthy: 2,
            threshold: 1,
            degraded: vec![Criterion::Grammar],
            missing: vec![Criterion::LexicalResource],
        };
        let msg = err.to_string();
        assert!(msg.contains("Grammar"));
        assert!(msg.contains("LexicalResource"));
        assert!(msg.contains("threshold 1"));
    }

    #[test]
    fn test_validation_converts_into_evaluation_error() {
        let err: EvaluationError = ValidationError::EmptyEssay.into();
        assert!(matches!(err, EvaluationError::Validation(_)));
    }
}
