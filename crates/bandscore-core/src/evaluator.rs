//! Criterion evaluator: one shared implementation, four configured profiles.
//!
//! Each profile names the criterion, the delegate capability and the prompt
//! focus. Retry and degrade handling is identical across criteria.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{ModelSpec, ModelTable, RetryPolicy};
use crate::delegate::{call_with_retry, Capability, GenerationRequest, TextGenerator};
use crate::describer::VisualContext;
use crate::domain::{Band, Criterion, CriterionResult, DelegateError, DelegateResult, EssayType};
use crate::prompt::{criterion_prompt, parse_json_reply, CriterionPromptInput};
use crate::rubric::{word_count_guidance, RubricExcerpt};

/// Static description of one criterion evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriterionProfile {
    pub criterion: Criterion,
    pub capability: Capability,
    /// Phrase used in the examiner prompt.
    pub focus: &'static str,
    /// Receives the visual-prompt description on Task-1 items.
    pub uses_visual: bool,
    /// Receives word-count guidance.
    pub uses_word_count: bool,
}

impl CriterionProfile {
    pub const fn standard() -> [CriterionProfile; 4] {
        [
            CriterionProfile {
                criterion: Criterion::TaskAchievement,
                capability: Capability::Task,
                focus: "Task Achievement / Task Response",
                uses_visual: true,
                uses_word_count: true,
            },
            CriterionProfile {
                criterion: Criterion::CoherenceCohesion,
                capability: Capability::Coherence,
                focus: "Coherence and Cohesion",
                uses_visual: false,
                uses_word_count: false,
            },
            CriterionProfile {
                criterion: Criterion::LexicalResource,
                capability: Capability::Lexical,
                focus: "Lexical Resource",
                uses_visual: false,
                uses_word_count: false,
            },
            CriterionProfile {
                criterion: Criterion::Grammar,
                capability: Capability::Grammar,
                focus: "Grammatical Range and Accuracy",
                uses_visual: false,
                uses_word_count: false,
            },
        ]
    }
}

/// Immutable per-submission inputs shared by the four evaluators.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub track_id: String,
    pub question: String,
    pub essay: String,
    pub essay_type: EssayType,
    pub target_band: Band,
    pub visual: VisualContext,
    /// Task-1 image reference, attached to the task request as-is.
    pub image_reference: Option<String>,
}

impl EvaluationContext {
    pub fn word_count(&self) -> usize {
        self.essay.split_whitespace().count()
    }
}

/// Accepts `6.5` as well as `"6.5"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScoreRepr {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
struct CriterionReply {
    score: ScoreRepr,
    comment: String,
}

fn validate_reply(reply: CriterionReply) -> DelegateResult<(Band, String)> {
    let raw = match reply.score {
        ScoreRepr::Number(n) => n,
        ScoreRepr::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| DelegateError::Malformed(format!("score {s:?} is not a number")))?,
    };
    let band = Band::new(raw).map_err(|e| DelegateError::Malformed(e.to_string()))?;
    let comment = reply.comment.trim();
    if comment.chars().count() < 3 {
        return Err(DelegateError::Malformed("comment is empty".to_string()));
    }
    Ok((band, comment.to_string()))
}

/// Scores one criterion through the text-generation delegate.
pub struct CriterionEvaluator {
    profile: CriterionProfile,
    model: ModelSpec,
    generator: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl CriterionEvaluator {
    pub fn new(
        profile: CriterionProfile,
        model: ModelSpec,
        generator: Arc<dyn TextGenerator>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            profile,
            model,
            generator,
            policy,
            call_timeout,
        }
    }

    /// The four standard evaluators, sharing one generator.
    pub fn standard_set(
        models: &ModelTable,
        generator: Arc<dyn TextGenerator>,
        policy: &RetryPolicy,
        call_timeout: Duration,
    ) -> Vec<CriterionEvaluator> {
        CriterionProfile::standard()
            .into_iter()
            .map(|profile| {
                CriterionEvaluator::new(
                    profile,
                    models.for_capability(profile.capability).clone(),
                    Arc::clone(&generator),
                    policy.clone(),
                    call_timeout,
                )
            })
            .collect()
    }

    pub fn criterion(&self) -> Criterion {
        self.profile.criterion
    }

    pub fn build_prompt(&self, ctx: &EvaluationContext, excerpt: &RubricExcerpt) -> String {
        let guidance = self
            .profile
            .uses_word_count
            .then(|| word_count_guidance(excerpt, ctx.word_count()));
        let image_description = if self.profile.uses_visual {
            ctx.visual.prompt_text()
        } else {
            None
        };

        criterion_prompt(&CriterionPromptInput {
            focus: self.profile.focus,
            essay: &ctx.essay,
            question: &ctx.question,
            excerpt,
            image_description,
            word_count_guidance: guidance.as_deref(),
        })
    }

    fn image_for(&self, ctx: &EvaluationContext) -> Option<String> {
        if self.profile.uses_visual && ctx.essay_type.is_task1() {
            ctx.image_reference.clone()
        } else {
            None
        }
    }

    /// Evaluate one criterion. Never fails: exhausted retries yield a degraded result.
    pub async fn evaluate(&self, ctx: &EvaluationContext, excerpt: &RubricExcerpt) -> CriterionResult {
        let request = GenerationRequest::new(
            self.profile.capability,
            self.model.clone(),
            self.build_prompt(ctx, excerpt),
        )
        .json()
        .with_image(self.image_for(ctx));
        let request = &request;
        let generator = self.generator.as_ref();

        let outcome = call_with_retry(
            self.profile.capability,
            &self.policy,
            self.call_timeout,
            |_| async move {
                let completion = generator.generate(request).await?;
                let reply: CriterionReply = parse_json_reply(&completion.text)?;
                validate_reply(reply)
            },
        )
        .await;

        match outcome.result {
            Ok((band, comment)) => {
                CriterionResult::ok(self.profile.criterion, band, comment, outcome.attempts)
            }
            Err(e) => CriterionResult::degraded(self.profile.criterion, e, outcome.attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CriterionStatus;
    use crate::fakes::{criterion_reply, ScriptedGenerator};
    use crate::prompt::DESCRIPTION_UNAVAILABLE;
    use crate::rubric::{JsonRubricProvider, RubricProvider};

    fn ctx(essay_type: EssayType, visual: VisualContext) -> EvaluationContext {
        EvaluationContext {
            track_id: "trk-1".into(),
            question: "Summarise the chart.".into(),
            essay: "The chart shows rainfall in three cities.".into(),
            essay_type,
            target_band: Band::new(7.0).unwrap(),
            visual,
            image_reference: Some("https://img.example/chart.png".into()),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            multiplier: 2.0,
        }
    }

    fn evaluator(criterion: Criterion, generator: Arc<ScriptedGenerator>) -> CriterionEvaluator {
        let profile = CriterionProfile::standard()
            .into_iter()
            .find(|p| p.criterion == criterion)
            .unwrap();
        CriterionEvaluator::new(
            profile,
            ModelSpec::new("gpt-4o-mini", 0.0),
            generator,
            policy(),
            Duration::from_secs(5),
        )
    }

    fn excerpt(criterion: Criterion, essay_type: EssayType) -> RubricExcerpt {
        JsonRubricProvider::bundled()
            .unwrap()
            .describe_criterion(criterion, essay_type)
            .unwrap()
    }

    #[test]
    fn test_standard_profiles_cover_every_criterion_once() {
        let profiles = CriterionProfile::standard();
        let mut criteria: Vec<_> = profiles.iter().map(|p| p.criterion).collect();
        criteria.sort();
        assert_eq!(criteria, Criterion::ALL.to_vec());
        assert_eq!(profiles.iter().filter(|p| p.uses_visual).count(), 1);
    }

    #[test]
    fn test_validate_reply_rules() {
        let ok = validate_reply(CriterionReply {
            score: ScoreRepr::Text("6.5".into()),
            comment: "Good range.".into(),
        })
        .unwrap();
        assert_eq!(ok.0, Band::new(6.5).unwrap());

        assert!(validate_reply(CriterionReply {
            score: ScoreRepr::Number(6.3),
            comment: "Good range.".into(),
        })
        .is_err());
        assert!(validate_reply(CriterionReply {
            score: ScoreRepr::Number(10.0),
            comment: "Good range.".into(),
        })
        .is_err());
        assert!(validate_reply(CriterionReply {
            score: ScoreRepr::Number(6.0),
            comment: " ".into(),
        })
        .is_err());
    }

    #[test]
    fn test_only_task_prompt_sees_visual_and_word_count() {
        let gen = Arc::new(ScriptedGenerator::new());
        let context = ctx(EssayType::AcademicTask1, VisualContext::Unavailable);

        let task = evaluator(Criterion::TaskAchievement, gen.clone());
        let prompt = task.build_prompt(&context, &excerpt(Criterion::TaskAchievement, EssayType::AcademicTask1));
        assert!(prompt.contains(DESCRIPTION_UNAVAILABLE));
        assert!(prompt.contains("Word Count:"));

        let grammar = evaluator(Criterion::Grammar, gen);
        let prompt = grammar.build_prompt(&context, &excerpt(Criterion::Grammar, EssayType::AcademicTask1));
        assert!(!prompt.contains(DESCRIPTION_UNAVAILABLE));
        assert!(!prompt.contains("Word Count:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_ok() {
        let gen = Arc::new(
            ScriptedGenerator::new().reply(Capability::Lexical, criterion_reply(7.0, "Wide range.")),
        );
        let result = evaluator(Criterion::LexicalResource, gen.clone())
            .evaluate(
                &ctx(EssayType::GeneralTask2, VisualContext::NotApplicable),
                &excerpt(Criterion::LexicalResource, EssayType::GeneralTask2),
            )
            .await;
        assert_eq!(result.status(), CriterionStatus::Ok);
        assert_eq!(result.score(), Band::new(7.0).ok());
        assert_eq!(result.attempts(), 1);
        assert_eq!(gen.calls(Capability::Lexical), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_recovers_from_malformed_answer() {
        let gen = Arc::new(ScriptedGenerator::new().fail_then_reply(
            Capability::Grammar,
            2,
            criterion_reply(5.5, "Frequent errors."),
        ));
        let result = evaluator(Criterion::Grammar, gen.clone())
            .evaluate(
                &ctx(EssayType::GeneralTask2, VisualContext::NotApplicable),
                &excerpt(Criterion::Grammar, EssayType::GeneralTask2),
            )
            .await;
        assert_eq!(result.status(), CriterionStatus::Ok);
        assert_eq!(result.attempts(), 3);
        assert_eq!(gen.calls(Capability::Grammar), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_degrades_after_retries() {
        let gen = Arc::new(ScriptedGenerator::new().always_fail(Capability::Coherence));
        let result = evaluator(Criterion::CoherenceCohesion, gen.clone())
            .evaluate(
                &ctx(EssayType::GeneralTask2, VisualContext::NotApplicable),
                &excerpt(Criterion::CoherenceCohesion, EssayType::GeneralTask2),
            )
            .await;
        assert_eq!(result.status(), CriterionStatus::Degraded);
        assert_eq!(result.score(), None);
        assert_eq!(result.attempts(), 3);
        assert!(result.comment().unwrap().starts_with("Assessment unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_request_carries_task1_image() {
        let gen = Arc::new(
            ScriptedGenerator::new()
                .reply(Capability::Task, criterion_reply(6.0, "Key features covered."))
                .reply(Capability::Grammar, criterion_reply(6.0, "Some slips.")),
        );
        let task1 = ctx(EssayType::AcademicTask1, VisualContext::Supplied("A bar chart.".into()));

        evaluator(Criterion::TaskAchievement, gen.clone())
            .evaluate(&task1, &excerpt(Criterion::TaskAchievement, EssayType::AcademicTask1))
            .await;
        evaluator(Criterion::Grammar, gen.clone())
            .evaluate(&task1, &excerpt(Criterion::Grammar, EssayType::AcademicTask1))
            .await;

        assert_eq!(
            gen.requests(Capability::Task)[0].image_reference.as_deref(),
            Some("https://img.example/chart.png")
        );
        assert_eq!(gen.requests(Capability::Grammar)[0].image_reference, None);

        let task2 = ctx(EssayType::AcademicTask2, VisualContext::NotApplicable);
        evaluator(Criterion::TaskAchievement, gen.clone())
            .evaluate(&task2, &excerpt(Criterion::TaskAchievement, EssayType::AcademicTask2))
            .await;
        assert_eq!(gen.requests(Capability::Task)[1].image_reference, None);
    }
}
