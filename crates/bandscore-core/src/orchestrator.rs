//! Orchestrator: drives one submission through the evaluation workflow.
//!
//! ```text
//! Init -> [DescribingImage] -> EvaluatingCriteria -> Aggregating
//!      -> [Auditing] -> GeneratingGaps -> Complete
//! ```
//!
//! `Failed` is reachable from every non-terminal state: validation errors at
//! `Init`, too many unhealthy criteria at `Aggregating`, and the whole-submission
//! budget anywhere. Describing, evaluating and gap analysis each run under
//! their own deadline, and configuration validation keeps their sum within the
//! submission budget, so that budget is a backstop.
//!
//! The four criterion evaluators run concurrently; the barrier before
//! `Aggregating` is the only synchronisation point. The audit runs detached on
//! an immutable snapshot and never gates the response.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{warn, Instrument};

use crate::aggregator::{aggregate, AggregationPolicy};
use crate::auditor::{AuditSink, AuditSnapshot, FileAuditSink, QualityAuditor, TracingAuditSink};
use crate::config::EngineConfig;
use crate::delegate::{Capability, ImageToText, TextGenerator};
use crate::describer::{ImagePromptDescriber, VisualContext};
use crate::domain::{
    ConfigError, CriterionResult, CriterionStatus, EssaySubmission, EvaluationError,
    EvaluationRecord, EvaluationResult, QualityVerdict,
};
use crate::evaluator::{CriterionEvaluator, EvaluationContext};
use crate::gap::GapAnalysisGenerator;
use crate::metrics::METRICS;
use crate::obs;
use crate::rubric::{validate_coverage, JsonRubricProvider, RubricExcerpt, RubricProvider};

/// Workflow states of a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Init,
    DescribingImage,
    EvaluatingCriteria,
    Aggregating,
    Auditing,
    GeneratingGaps,
    Complete,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Init => "init",
            WorkflowState::DescribingImage => "describing_image",
            WorkflowState::EvaluatingCriteria => "evaluating_criteria",
            WorkflowState::Aggregating => "aggregating",
            WorkflowState::Auditing => "auditing",
            WorkflowState::GeneratingGaps => "generating_gaps",
            WorkflowState::Complete => "complete",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Complete | WorkflowState::Failed)
    }

    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Init, DescribingImage)
                | (Init, EvaluatingCriteria)
                | (DescribingImage, EvaluatingCriteria)
                | (EvaluatingCriteria, Aggregating)
                | (Aggregating, Auditing)
                | (Aggregating, GeneratingGaps)
                | (Auditing, GeneratingGaps)
                | (GeneratingGaps, Complete)
        )
    }
}

/// Per-submission state-machine instance.
struct Transitions {
    track_id: String,
    history: Mutex<Vec<WorkflowState>>,
}

impl Transitions {
    fn new(track_id: &str) -> Self {
        Self {
            track_id: track_id.to_string(),
            history: Mutex::new(vec![WorkflowState::Init]),
        }
    }

    fn advance(&self, next: WorkflowState) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let current = history.last().copied().unwrap_or(WorkflowState::Init);
        if !current.can_transition_to(next) {
            warn!(
                track_id = %self.track_id,
                from = current.as_str(),
                to = next.as_str(),
                "illegal workflow transition ignored"
            );
            return;
        }
        obs::emit_state_transition(&self.track_id, current.as_str(), next.as_str());
        history.push(next);
    }

    fn into_history(self) -> Vec<WorkflowState> {
        self.history
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`Orchestrator`], validating configuration and rubric coverage.
pub struct OrchestratorBuilder {
    config: EngineConfig,
    rubric: Option<Arc<dyn RubricProvider>>,
    generator: Option<Arc<dyn TextGenerator>>,
    image_to_text: Option<Arc<dyn ImageToText>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl OrchestratorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            rubric: None,
            generator: None,
            image_to_text: None,
            audit_sink: None,
        }
    }

    pub fn rubric(mut self, rubric: Arc<dyn RubricProvider>) -> Self {
        self.rubric = Some(rubric);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn image_to_text(mut self, image_to_text: Arc<dyn ImageToText>) -> Self {
        self.image_to_text = Some(image_to_text);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        let config = self.config;
        config.validate()?;

        let rubric: Arc<dyn RubricProvider> = match self.rubric {
            Some(rubric) => rubric,
            None => match &config.rubric_path {
                Some(path) => Arc::new(JsonRubricProvider::from_path(path)?),
                None => Arc::new(JsonRubricProvider::bundled()?),
            },
        };
        validate_coverage(rubric.as_ref())?;

        let generator = self.generator.ok_or_else(|| ConfigError::InvalidSetting {
            field: "generator".to_string(),
            reason: "a text-generation delegate is required".to_string(),
        })?;
        let image_to_text = self.image_to_text.ok_or_else(|| ConfigError::InvalidSetting {
            field: "image_to_text".to_string(),
            reason: "an image-to-text delegate is required".to_string(),
        })?;
        let audit_sink: Arc<dyn AuditSink> = match (self.audit_sink, &config.audit.artifact_dir) {
            (Some(sink), _) => sink,
            (None, Some(dir)) => Arc::new(FileAuditSink::new(dir.clone())),
            (None, None) => Arc::new(TracingAuditSink),
        };

        let call_timeout = config.delegate_timeout();
        let models = &config.models;
        let evaluators = CriterionEvaluator::standard_set(
            models,
            Arc::clone(&generator),
            &config.retry,
            call_timeout,
        )
        .into_iter()
        .map(Arc::new)
        .collect();
        let describer = ImagePromptDescriber::new(
            image_to_text,
            models.for_capability(Capability::ImageDescription).clone(),
            config.retry.clone(),
            call_timeout,
            config.describe_timeout(),
        );
        let auditor = config.audit.enabled.then(|| {
            Arc::new(QualityAuditor::new(
                Arc::clone(&generator),
                Arc::clone(&rubric),
                models.for_capability(Capability::QualityAudit).clone(),
                config.retry.clone(),
                call_timeout,
            ))
        });
        let gap = GapAnalysisGenerator::new(
            generator,
            Arc::clone(&rubric),
            models.for_capability(Capability::GapAnalysis).clone(),
            config.retry.clone(),
            call_timeout,
            config.gap_timeout(),
        );

        Ok(Orchestrator {
            policy: AggregationPolicy {
                max_unhealthy: config.max_unhealthy_criteria,
            },
            config,
            rubric,
            evaluators,
            describer,
            auditor,
            gap,
            audit_sink,
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Evaluation engine. Holds no per-submission state; safe to share across tasks.
pub struct Orchestrator {
    config: EngineConfig,
    policy: AggregationPolicy,
    rubric: Arc<dyn RubricProvider>,
    evaluators: Vec<Arc<CriterionEvaluator>>,
    describer: ImagePromptDescriber,
    auditor: Option<Arc<QualityAuditor>>,
    gap: GapAnalysisGenerator,
    audit_sink: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn builder(config: EngineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate one submission.
    pub async fn evaluate(&self, submission: EssaySubmission) -> EvaluationResult<EvaluationRecord> {
        self.evaluate_traced(submission).await.0
    }

    /// Evaluate and also return the sequence of workflow states visited.
    pub async fn evaluate_traced(
        &self,
        submission: EssaySubmission,
    ) -> (EvaluationResult<EvaluationRecord>, Vec<WorkflowState>) {
        let span = obs::span(&submission.track_id);
        async move {
            METRICS.inc_evaluations_started();
            let started = Instant::now();
            let track_id = submission.track_id.clone();
            let transitions = Transitions::new(&track_id);

            let result = match submission.validate() {
                Err(e) => Err(EvaluationError::from(e)),
                Ok(()) => {
                    obs::emit_evaluation_started(
                        &track_id,
                        submission.essay_type.code(),
                        submission.word_count(),
                    );
                    let budget = self.config.submission_timeout();
                    match tokio::time::timeout(budget, self.drive(submission, &transitions)).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(budget_ms = self.config.submission_timeout_ms, "submission budget exhausted; outstanding work cancelled");
                            Err(EvaluationError::Timeout {
                                budget_ms: self.config.submission_timeout_ms,
                            })
                        }
                    }
                }
            };

            let digest = match &result {
                Ok(record) => {
                    METRICS.inc_evaluations_completed();
                    Some(record.digest())
                }
                Err(e) => {
                    METRICS.inc_evaluations_failed();
                    warn!(error = %e, "evaluation failed");
                    transitions.advance(WorkflowState::Failed);
                    None
                }
            };
            obs::emit_evaluation_finished(
                &track_id,
                started.elapsed().as_millis() as u64,
                result.is_ok(),
                digest.as_deref(),
            );
            (result, transitions.into_history())
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        submission: EssaySubmission,
        transitions: &Transitions,
    ) -> EvaluationResult<EvaluationRecord> {
        let track_id = submission.track_id.clone();
        let essay_type = submission.essay_type;

        let visual = match VisualContext::from_submission(&submission) {
            Some(visual) => visual,
            None => {
                transitions.advance(WorkflowState::DescribingImage);
                let reference = submission.image_reference().unwrap_or_default();
                self.describer.describe(reference).await
            }
        };

        transitions.advance(WorkflowState::EvaluatingCriteria);
        let mut jobs = Vec::with_capacity(self.evaluators.len());
        for evaluator in &self.evaluators {
            let excerpt = self.rubric.describe_criterion(evaluator.criterion(), essay_type)?;
            jobs.push((Arc::clone(evaluator), excerpt));
        }
        let image_reference = essay_type
            .is_task1()
            .then(|| submission.image_reference().map(str::to_string))
            .flatten();
        let ctx = Arc::new(EvaluationContext {
            track_id: track_id.clone(),
            question: submission.question,
            essay: submission.essay,
            essay_type,
            target_band: submission.target_band,
            visual,
            image_reference,
        });
        let results = self.fan_out(Arc::clone(&ctx), jobs).await;

        transitions.advance(WorkflowState::Aggregating);
        let aggregated = aggregate(
            &track_id,
            results,
            ctx.visual.description().map(str::to_string),
            self.policy,
        );
        let record = match aggregated {
            Ok(record) => record,
            Err(e) => {
                if let EvaluationError::Aggregation {
                    unhealthy,
                    degraded,
                    missing,
                    ..
                } = &e
                {
                    record_unhealthy(degraded.len(), missing.len());
                    obs::emit_aggregation(&track_id, *unhealthy, self.policy.max_unhealthy, false);
                }
                return Err(e);
            }
        };
        let degraded = record.criteria_with_status(CriterionStatus::Degraded).len();
        let missing = record.criteria_with_status(CriterionStatus::Missing).len();
        record_unhealthy(degraded, missing);
        obs::emit_aggregation(&track_id, degraded + missing, self.policy.max_unhealthy, true);

        let audit = match &self.auditor {
            Some(auditor) => {
                transitions.advance(WorkflowState::Auditing);
                Some(self.spawn_audit(auditor, Arc::new(record.clone()), Arc::clone(&ctx)))
            }
            None => None,
        };

        transitions.advance(WorkflowState::GeneratingGaps);
        let (plan, feedback) = self
            .gap
            .generate(&record, essay_type, ctx.target_band)
            .await;
        let mut record = record.with_feedback(plan.overall_band, feedback);

        if let Some(verdict_rx) = audit {
            let verdict = match tokio::time::timeout(self.config.audit_attach_timeout(), verdict_rx).await {
                Ok(Ok(verdict)) => verdict,
                _ => QualityVerdict::pending(),
            };
            record = record.with_quality_verdict(verdict);
        }

        transitions.advance(WorkflowState::Complete);
        Ok(record)
    }

    /// Run every evaluator concurrently and wait for all of them, up to the
    /// criteria deadline. Unfinished evaluators are aborted and left out.
    async fn fan_out(
        &self,
        ctx: Arc<EvaluationContext>,
        jobs: Vec<(Arc<CriterionEvaluator>, RubricExcerpt)>,
    ) -> Vec<CriterionResult> {
        let mut set = JoinSet::new();
        for (evaluator, excerpt) in jobs {
            let ctx = Arc::clone(&ctx);
            set.spawn(
                async move { evaluator.evaluate(&ctx, &excerpt).await }
                    .instrument(tracing::Span::current()),
            );
        }

        let deadline = Instant::now() + self.config.criteria_timeout();
        let mut results = Vec::with_capacity(set.len());
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(result))) => {
                    obs::emit_criterion_finished(
                        &ctx.track_id,
                        result.criterion(),
                        result.status(),
                        result.attempts(),
                    );
                    results.push(result);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "criterion task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        outstanding = set.len(),
                        timeout_ms = self.config.criteria_timeout_ms,
                        "criteria deadline elapsed; cancelling outstanding evaluators"
                    );
                    set.abort_all();
                    break;
                }
            }
        }
        results
    }

    fn spawn_audit(
        &self,
        auditor: &Arc<QualityAuditor>,
        record: Arc<EvaluationRecord>,
        context: Arc<EvaluationContext>,
    ) -> oneshot::Receiver<QualityVerdict> {
        let (tx, rx) = oneshot::channel();
        let auditor = Arc::clone(auditor);
        let sink = Arc::clone(&self.audit_sink);
        let snapshot = AuditSnapshot { record, context };

        tokio::spawn(
            async move {
                METRICS.inc_audits_run();
                let report = auditor.audit(&snapshot).await;
                let track_id = report.track_id.clone();
                obs::emit_audit_finished(
                    &track_id,
                    report.verdict.overall_quality,
                    report.verdict.flagged_criteria.len(),
                );
                // The response path may have stopped waiting.
                let _ = tx.send(report.verdict.clone());
                if let Err(e) = sink.deliver(&report).await {
                    obs::emit_audit_failed(&track_id, &e);
                }
            }
            .instrument(tracing::Span::current()),
        );
        rx
    }
}

fn record_unhealthy(degraded: usize, missing: usize) {
    for _ in 0..degraded {
        METRICS.inc_criteria_degraded();
    }
    for _ in 0..missing {
        METRICS.inc_criteria_missing();
    }
}
