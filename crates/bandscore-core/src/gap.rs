//! Gap analysis: rank criteria by distance below the target band and turn
//! the ranking into an improvement plan.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::config::{ModelSpec, RetryPolicy};
use crate::delegate::{call_with_retry, Capability, GenerationRequest, TextGenerator};
use crate::domain::{Band, Criterion, EssayType, EvaluationRecord, TaskNumber};
use crate::prompt::{gap_prompt, parse_json_reply, GapPromptCriterion};
use crate::rubric::RubricProvider;

/// Overview used when the overall band already meets the target.
pub const TARGET_MET_OVERVIEW: &str =
    "Well Done. The essay meets or exceeds your target band. Maintain current writing quality.";

/// One assessed criterion and how far it sits below the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapEntry {
    pub criterion: Criterion,
    pub score: Band,
    /// Target minus score, in bands. Negative when above target.
    pub gap: f64,
}

/// Ranked improvement plan derived from a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapPlan {
    pub overall_band: Option<Band>,
    pub target_band: Band,
    pub met_target: bool,
    /// Largest gap first; ties follow criterion priority.
    pub ranked: Vec<GapEntry>,
    /// Criteria without a score, in priority order.
    pub not_assessed: Vec<Criterion>,
}

impl GapPlan {
    /// Entries strictly below the target.
    pub fn weak(&self) -> impl Iterator<Item = &GapEntry> {
        self.ranked.iter().filter(|e| e.gap > 0.0)
    }
}

/// Pure ranking step.
pub fn plan(record: &EvaluationRecord, target: Band) -> GapPlan {
    let mut ranked = Vec::new();
    let mut not_assessed = Vec::new();
    for result in record.criteria() {
        match result.score() {
            Some(score) => ranked.push(GapEntry {
                criterion: result.criterion(),
                score,
                gap: f64::from(score.half_steps_below(target)) / 2.0,
            }),
            None => not_assessed.push(result.criterion()),
        }
    }
    ranked.sort_by(|a, b| {
        b.score
            .half_steps_below(target)
            .cmp(&a.score.half_steps_below(target))
            .then(a.criterion.cmp(&b.criterion))
    });

    let scores: Vec<Band> = ranked.iter().map(|e| e.score).collect();
    let overall_band = Band::floor_mean(&scores);
    GapPlan {
        overall_band,
        target_band: target,
        met_target: overall_band.is_some_and(|b| b >= target),
        ranked,
        not_assessed,
    }
}

/// Render the plan as markdown feedback.
pub fn render_feedback(
    plan: &GapPlan,
    task: TaskNumber,
    suggestions: &HashMap<Criterion, Vec<String>>,
) -> String {
    let mut out = String::from("**Overview:**\n");
    let target = plan.target_band;
    match plan.overall_band {
        Some(overall) if plan.met_target => {
            let _ = writeln!(out, "{TARGET_MET_OVERVIEW}");
            let _ = writeln!(
                out,
                "Your current overall band is {overall} and your target is Band {target}."
            );
        }
        Some(overall) => {
            let _ = write!(
                out,
                "Your current overall band is {overall} and your target is Band {target}."
            );
            if let Some(first) = plan.weak().next() {
                let _ = write!(
                    out,
                    " The main area for improvement is **{}**, currently at Band {}.",
                    first.criterion.rubric_name(task),
                    first.score
                );
            }
            out.push('\n');
        }
        None => {
            let _ = writeln!(
                out,
                "No criterion could be assessed, so no overall band is available. Your target is Band {target}."
            );
        }
    }

    out.push_str("\n**Improvement Plan:**\n");
    for entry in &plan.ranked {
        let name = entry.criterion.rubric_name(task);
        if entry.gap > 0.0 {
            let _ = writeln!(
                out,
                "- **{name}** (Band {} -> Band {target}, gap {})",
                entry.score, entry.gap
            );
            for suggestion in suggestions.get(&entry.criterion).into_iter().flatten().take(2) {
                let _ = writeln!(out, "  - {suggestion}");
            }
        } else {
            let _ = writeln!(
                out,
                "- **{name}** (Band {}): at or above target, gap 0.",
                entry.score
            );
        }
    }
    for criterion in &plan.not_assessed {
        let _ = writeln!(
            out,
            "- **{}**: not assessed. This criterion could not be evaluated and is excluded from the overall band.",
            criterion.rubric_name(task)
        );
    }
    out
}

/// Produces `overallFeedback` for a deliverable record.
pub struct GapAnalysisGenerator {
    generator: Arc<dyn TextGenerator>,
    rubric: Arc<dyn RubricProvider>,
    model: ModelSpec,
    policy: RetryPolicy,
    call_timeout: Duration,
    deadline: Duration,
}

impl GapAnalysisGenerator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        rubric: Arc<dyn RubricProvider>,
        model: ModelSpec,
        policy: RetryPolicy,
        call_timeout: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            generator,
            rubric,
            model,
            policy,
            call_timeout,
            deadline,
        }
    }

    /// Plan plus rendered feedback. Suggestions are best effort and bounded by
    /// the gap deadline; without them the plan is rendered on its own.
    pub async fn generate(
        &self,
        record: &EvaluationRecord,
        essay_type: EssayType,
        target: Band,
    ) -> (GapPlan, String) {
        let plan = plan(record, target);
        let task = essay_type.task();
        if plan.met_target || plan.weak().next().is_none() {
            let feedback = render_feedback(&plan, task, &HashMap::new());
            return (plan, feedback);
        }

        let suggestions = self.suggestions(record, &plan, essay_type).await;
        let feedback = render_feedback(&plan, task, &suggestions);
        (plan, feedback)
    }

    async fn suggestions(
        &self,
        record: &EvaluationRecord,
        plan: &GapPlan,
        essay_type: EssayType,
    ) -> HashMap<Criterion, Vec<String>> {
        let target_whole = plan.target_band.floor_whole();
        let criteria: Vec<GapPromptCriterion<'_>> = plan
            .weak()
            .map(|entry| {
                let assessment = self
                    .rubric
                    .describe_criterion(entry.criterion, essay_type)
                    .map(|excerpt| excerpt.assessment_text())
                    .unwrap_or_default();
                GapPromptCriterion {
                    key: entry.criterion.as_str(),
                    name: entry.criterion.rubric_name(essay_type.task()),
                    score: entry.score.to_string(),
                    comment: record
                        .criterion(entry.criterion)
                        .and_then(|r| r.comment())
                        .unwrap_or("No comment available"),
                    target_descriptor: self.rubric.target_band_descriptor(
                        entry.criterion,
                        essay_type,
                        target_whole,
                    ),
                    assessment,
                }
            })
            .collect();

        let overall = plan
            .overall_band
            .map(|b| b.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let request = GenerationRequest::new(
            Capability::GapAnalysis,
            self.model.clone(),
            gap_prompt(&overall, &plan.target_band.to_string(), &criteria),
        )
        .json();
        let request = &request;
        let generator = self.generator.as_ref();

        let attempts = call_with_retry(
            Capability::GapAnalysis,
            &self.policy,
            self.call_timeout,
            |_| async move {
                let completion = generator.generate(request).await?;
                parse_json_reply::<BTreeMap<String, Vec<String>>>(&completion.text)
            },
        );
        let Ok(outcome) = tokio::time::timeout(self.deadline, attempts).await else {
            warn!(
                deadline_ms = self.deadline.as_millis() as u64,
                "gap suggestions deadline elapsed; returning plan only"
            );
            return HashMap::new();
        };

        match outcome.result {
            Ok(raw) => raw
                .into_iter()
                .filter_map(|(key, items)| match key.parse::<Criterion>() {
                    Ok(criterion) => Some((criterion, items)),
                    Err(_) => {
                        warn!(key = %key, "gap suggestions for unknown criterion ignored");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "gap suggestions unavailable; returning plan only");
                HashMap::new()
            }
        }
    }
}
