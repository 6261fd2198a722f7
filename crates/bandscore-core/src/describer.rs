//! Visual-prompt describer for Task-1 items.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ModelSpec, RetryPolicy};
use crate::delegate::{call_with_retry, Capability, GenerationRequest, ImageToText};
use crate::domain::{DelegateError, EssaySubmission};
use crate::prompt::{describer_prompt, DESCRIPTION_UNAVAILABLE};

/// What the evaluators know about the visual prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualContext {
    /// Task-2 item, or a Task-1 item with neither reference nor description.
    NotApplicable,
    /// The caller supplied a description.
    Supplied(String),
    /// The describer produced a description.
    Generated(String),
    /// The describer was invoked and failed.
    Unavailable,
}

impl VisualContext {
    /// Resolve what can be known without calling the describer.
    ///
    /// Returns `None` when the describer must run.
    pub fn from_submission(submission: &EssaySubmission) -> Option<Self> {
        if !submission.essay_type.is_task1() {
            return Some(VisualContext::NotApplicable);
        }
        if let Some(description) = submission.supplied_description() {
            return Some(VisualContext::Supplied(description.to_string()));
        }
        if submission.needs_image_description() {
            return None;
        }
        Some(VisualContext::NotApplicable)
    }

    /// Description carried into the record.
    pub fn description(&self) -> Option<&str> {
        match self {
            VisualContext::Supplied(d) | VisualContext::Generated(d) => Some(d),
            VisualContext::NotApplicable | VisualContext::Unavailable => None,
        }
    }

    /// Text placed in evaluator prompts.
    pub fn prompt_text(&self) -> Option<&str> {
        match self {
            VisualContext::Unavailable => Some(DESCRIPTION_UNAVAILABLE),
            other => other.description(),
        }
    }
}

/// Turns an image reference into a short textual description.
pub struct ImagePromptDescriber {
    image_to_text: Arc<dyn ImageToText>,
    model: ModelSpec,
    policy: RetryPolicy,
    call_timeout: Duration,
    deadline: Duration,
}

impl ImagePromptDescriber {
    pub fn new(
        image_to_text: Arc<dyn ImageToText>,
        model: ModelSpec,
        policy: RetryPolicy,
        call_timeout: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            image_to_text,
            model,
            policy,
            call_timeout,
            deadline,
        }
    }

    /// Describe the image. Never fails: persistent failure, or running past
    /// the describer deadline, yields [`VisualContext::Unavailable`].
    pub async fn describe(&self, image_reference: &str) -> VisualContext {
        let request =
            GenerationRequest::new(Capability::ImageDescription, self.model.clone(), describer_prompt());

        let request = &request;
        let image_to_text = self.image_to_text.as_ref();

        let attempts = call_with_retry(
            Capability::ImageDescription,
            &self.policy,
            self.call_timeout,
            |_| async move {
                let completion = image_to_text.describe_image(image_reference, request).await?;
                let text = completion.text.trim();
                if text.is_empty() || text.eq_ignore_ascii_case("null") {
                    return Err(DelegateError::Malformed("empty image description".into()));
                }
                Ok(text.to_string())
            },
        );
        let outcome = match tokio::time::timeout(self.deadline, attempts).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    deadline_ms = self.deadline.as_millis() as u64,
                    "image describer deadline elapsed; continuing without a description"
                );
                return VisualContext::Unavailable;
            }
        };

        match outcome.result {
            Ok(description) => {
                info!(attempts = outcome.attempts, "image description generated");
                VisualContext::Generated(description)
            }
            Err(e) => {
                warn!(attempts = outcome.attempts, error = %e, "image description unavailable");
                VisualContext::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Band, EssayType};
    use crate::fakes::ScriptedImageToText;

    fn submission(essay_type: EssayType) -> EssaySubmission {
        EssaySubmission::new(
            "trk-1",
            "Describe the chart.",
            "The chart shows...",
            essay_type,
            Band::new(6.0).unwrap(),
        )
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
        }
    }

    #[test]
    fn test_visual_context_resolution() {
        let t2 = submission(EssayType::AcademicTask2)
            .with_image_reference("https://x/y.png")
            .with_image_description("A chart.");
        assert_eq!(VisualContext::from_submission(&t2), Some(VisualContext::NotApplicable));

        let supplied = submission(EssayType::AcademicTask1)
            .with_image_reference("https://x/y.png")
            .with_image_description("A chart.");
        assert_eq!(
            VisualContext::from_submission(&supplied),
            Some(VisualContext::Supplied("A chart.".into()))
        );

        let needs = submission(EssayType::AcademicTask1).with_image_reference("https://x/y.png");
        assert_eq!(VisualContext::from_submission(&needs), None);

        let letter = submission(EssayType::GeneralTask1);
        assert_eq!(
            VisualContext::from_submission(&letter),
            Some(VisualContext::NotApplicable)
        );
    }

    #[test]
    fn test_unavailable_gets_marker() {
        assert_eq!(
            VisualContext::Unavailable.prompt_text(),
            Some(DESCRIPTION_UNAVAILABLE)
        );
        assert_eq!(VisualContext::Unavailable.description(), None);
        assert_eq!(VisualContext::NotApplicable.prompt_text(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_describe_degrades_on_failure() {
        let fake = Arc::new(ScriptedImageToText::failing());
        let describer = ImagePromptDescriber::new(
            fake.clone(),
            ModelSpec::new("gpt-4o-mini", 0.0),
            fast_policy(),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        assert_eq!(describer.describe("https://x/y.png").await, VisualContext::Unavailable);
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_describe_returns_generated_text() {
        let fake = Arc::new(ScriptedImageToText::replying("A line graph of rainfall."));
        let describer = ImagePromptDescriber::new(
            fake.clone(),
            ModelSpec::new("gpt-4o-mini", 0.0),
            fast_policy(),
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        assert_eq!(
            describer.describe("https://x/y.png").await,
            VisualContext::Generated("A line graph of rainfall.".into())
        );
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_describer_deadline_bounds_retries() {
        let fake = Arc::new(ScriptedImageToText::hanging());
        let describer = ImagePromptDescriber::new(
            fake.clone(),
            ModelSpec::new("gpt-4o-mini", 0.0),
            RetryPolicy::default(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        );

        let started = tokio::time::Instant::now();
        assert_eq!(describer.describe("https://x/y.png").await, VisualContext::Unavailable);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
        assert_eq!(fake.calls(), 1);
    }
}
