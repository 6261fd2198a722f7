//! Contracts for the external text-generation and image-to-text capabilities.
//!
//! Both are treated as untrusted, latency-variable remote services. Every call
//! goes through [`call_with_retry`], which applies the per-call timeout and the
//! bounded backoff from [`RetryPolicy`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ModelSpec, RetryPolicy};
use crate::domain::{Criterion, DelegateError, DelegateResult};
use crate::metrics::METRICS;

/// Which part of the workflow a delegate call serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Grammar,
    Lexical,
    Task,
    Coherence,
    ImageDescription,
    QualityAudit,
    GapAnalysis,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Grammar,
        Capability::Lexical,
        Capability::Task,
        Capability::Coherence,
        Capability::ImageDescription,
        Capability::QualityAudit,
        Capability::GapAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Grammar => "grammar",
            Capability::Lexical => "lexical",
            Capability::Task => "task",
            Capability::Coherence => "coherence",
            Capability::ImageDescription => "image_description",
            Capability::QualityAudit => "quality_audit",
            Capability::GapAnalysis => "gap_analysis",
        }
    }
}

impl From<Criterion> for Capability {
    fn from(criterion: Criterion) -> Self {
        match criterion {
            Criterion::TaskAchievement => Capability::Task,
            Criterion::CoherenceCohesion => Capability::Coherence,
            Criterion::LexicalResource => Capability::Lexical,
            Criterion::Grammar => Capability::Grammar,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single prompt sent to a delegate.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub capability: Capability,
    pub model: ModelSpec,
    pub prompt: String,
    /// Ask the delegate for a JSON object answer.
    pub expect_json: bool,
    /// Image sent alongside the prompt when the delegate can take one.
    pub image_reference: Option<String>,
}

impl GenerationRequest {
    pub fn new(capability: Capability, model: ModelSpec, prompt: impl Into<String>) -> Self {
        Self {
            capability,
            model,
            prompt: prompt.into(),
            expect_json: false,
            image_reference: None,
        }
    }

    pub fn json(mut self) -> Self {
        self.expect_json = true;
        self
    }

    pub fn with_image(mut self, image_reference: Option<String>) -> Self {
        self.image_reference = image_reference;
        self
    }
}

/// Token accounting reported by the delegate, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Raw delegate answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
        }
    }
}

/// Text-generation capability shared by the evaluators, auditor and gap analysis.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> DelegateResult<Completion>;
}

/// Image-to-text capability, used only by the visual-prompt describer.
#[async_trait]
pub trait ImageToText: Send + Sync {
    async fn describe_image(
        &self,
        image_reference: &str,
        request: &GenerationRequest,
    ) -> DelegateResult<Completion>;
}

/// Result of a retried delegate call.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: DelegateResult<T>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy
/// is exhausted. Each attempt is bounded by `call_timeout`.
pub async fn call_with_retry<T, F, Fut>(
    capability: Capability,
    policy: &RetryPolicy,
    call_timeout: Duration,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DelegateResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(call_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(DelegateError::Timeout {
                after_ms: call_timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = policy.backoff_for(attempt);
                debug!(
                    capability = %capability,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "delegate call failed; retrying"
                );
                METRICS.inc_delegate_retries();
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!(capability = %capability, attempts = attempt, error = %e, "delegate call gave up");
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}
