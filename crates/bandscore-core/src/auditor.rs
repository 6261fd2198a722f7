//! Advisory quality audit of an aggregated evaluation.
//!
//! The auditor reads an immutable snapshot of the record and never changes
//! what the caller receives. Its full report goes to an [`AuditSink`]; only a
//! compact [`QualityVerdict`] may be attached to the record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::{ModelSpec, RetryPolicy};
use crate::delegate::{call_with_retry, Capability, GenerationRequest, TextGenerator, TokenUsage};
use crate::domain::{
    AuditStatus, Criterion, CriterionStatus, DelegateResult, EvaluationRecord, QualityVerdict,
};
use crate::evaluator::EvaluationContext;
use crate::prompt::{audit_prompt, parse_json_reply, AuditPromptInput, AuditedCriterion};
use crate::rubric::RubricProvider;

/// What the auditor reads. Both halves are shared, never mutated.
#[derive(Debug, Clone)]
pub struct AuditSnapshot {
    pub record: Arc<EvaluationRecord>,
    pub context: Arc<EvaluationContext>,
}

/// Meta summary returned by the audit delegate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetaSummary {
    #[serde(default)]
    pub overall_quality: f64,
    #[serde(default)]
    pub key_strengths: Vec<String>,
    #[serde(default)]
    pub key_weaknesses: Vec<String>,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuditReply {
    #[serde(default)]
    task_accuracy: BTreeMap<String, f64>,
    #[serde(default, alias = "grammar_eval_qualy")]
    grammar_eval_quality: BTreeMap<String, f64>,
    #[serde(default, alias = "lexical_eval_qualy")]
    lexical_eval_quality: BTreeMap<String, f64>,
    #[serde(default, alias = "coherence_eval_qualy")]
    coherence_eval_quality: BTreeMap<String, f64>,
    #[serde(default, alias = "feedback_qualy")]
    feedback_quality: BTreeMap<String, f64>,
    meta_summary: MetaSummary,
}

impl AuditReply {
    fn dimensions(self) -> (BTreeMap<String, BTreeMap<String, f64>>, MetaSummary) {
        let clamp = |m: BTreeMap<String, f64>| -> BTreeMap<String, f64> {
            m.into_iter().map(|(k, v)| (k, v.clamp(0.0, 1.0))).collect()
        };
        let mut dims = BTreeMap::new();
        dims.insert("task_accuracy".to_string(), clamp(self.task_accuracy));
        dims.insert("grammar_eval_quality".to_string(), clamp(self.grammar_eval_quality));
        dims.insert("lexical_eval_quality".to_string(), clamp(self.lexical_eval_quality));
        dims.insert("coherence_eval_quality".to_string(), clamp(self.coherence_eval_quality));
        dims.insert("feedback_quality".to_string(), clamp(self.feedback_quality));

        let mut meta = self.meta_summary;
        meta.overall_quality = meta.overall_quality.clamp(0.0, 1.0);
        meta.key_strengths.truncate(3);
        meta.key_weaknesses.truncate(3);
        meta.improvement_suggestions.truncate(3);
        (dims, meta)
    }
}

/// An `Ok` criterion whose comment tone contradicts its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyFlag {
    pub criterion: Criterion,
    pub score: f64,
    pub reason: String,
}

/// Full audit output, delivered to an [`AuditSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub track_id: String,
    pub verdict: QualityVerdict,
    pub dimensions: BTreeMap<String, BTreeMap<String, f64>>,
    pub meta_summary: Option<MetaSummary>,
    pub consistency_flags: Vec<ConsistencyFlag>,
    pub usage: Option<TokenUsage>,
    pub record_digest: String,
    pub evaluated_at: DateTime<Utc>,
}

const POSITIVE_WORDS: &[&str] = &[
    "excellent", "strong", "good", "well", "effective", "accurate", "wide", "clear", "skilful",
    "skillful", "impressive", "fluent", "precise", "sophisticated", "natural",
];

const NEGATIVE_WORDS: &[&str] = &[
    "poor", "weak", "limited", "errors", "error", "inaccurate", "unclear", "confusing",
    "repetitive", "lacks", "lack", "fails", "irrelevant", "frequent", "basic", "mistakes",
];

/// Flag `Ok` criteria whose wording leans hard against the numeric score.
pub fn check_consistency(record: &EvaluationRecord) -> Vec<ConsistencyFlag> {
    let mut flags = Vec::new();
    for result in record.criteria() {
        if result.status() != CriterionStatus::Ok {
            continue;
        }
        let (Some(score), Some(comment)) = (result.score(), result.comment()) else {
            continue;
        };
        let (positive, negative) = tone_counts(comment);
        let score = score.value();
        let reason = if score >= 7.0 && negative >= 3 && negative > positive * 2 {
            Some(format!(
                "band {score} with predominantly negative comment ({negative} negative, {positive} positive terms)"
            ))
        } else if score <= 4.0 && positive >= 3 && positive > negative * 2 {
            Some(format!(
                "band {score} with predominantly positive comment ({positive} positive, {negative} negative terms)"
            ))
        } else {
            None
        };
        if let Some(reason) = reason {
            flags.push(ConsistencyFlag {
                criterion: result.criterion(),
                score,
                reason,
            });
        }
    }
    flags
}

fn tone_counts(comment: &str) -> (usize, usize) {
    let mut positive = 0;
    let mut negative = 0;
    for word in comment
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if POSITIVE_WORDS.contains(&word.as_str()) {
            positive += 1;
        } else if NEGATIVE_WORDS.contains(&word.as_str()) {
            negative += 1;
        }
    }
    (positive, negative)
}

/// Re-examines an aggregated record through the audit delegate.
pub struct QualityAuditor {
    generator: Arc<dyn TextGenerator>,
    rubric: Arc<dyn RubricProvider>,
    model: ModelSpec,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl QualityAuditor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        rubric: Arc<dyn RubricProvider>,
        model: ModelSpec,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            rubric,
            model,
            policy,
            call_timeout,
        }
    }

    fn build_prompt(&self, snapshot: &AuditSnapshot) -> String {
        let ctx = &snapshot.context;
        let criteria = snapshot
            .record
            .criteria()
            .map(|r| AuditedCriterion {
                name: r.criterion().rubric_name(ctx.essay_type.task()),
                score: r.score().map(|b| b.to_string()),
                comment: r.comment().unwrap_or("not assessed"),
                descriptor: r
                    .score()
                    .map(|b| {
                        self.rubric
                            .target_band_descriptor(r.criterion(), ctx.essay_type, b.floor_whole())
                    })
                    .unwrap_or_default(),
            })
            .collect();

        audit_prompt(&AuditPromptInput {
            track_id: &ctx.track_id,
            essay: &ctx.essay,
            question: &ctx.question,
            essay_type: ctx.essay_type,
            criteria,
        })
    }

    /// Run the audit. Never fails: delegate failure yields a `Failed` verdict.
    pub async fn audit(&self, snapshot: &AuditSnapshot) -> AuditReport {
        let record = &snapshot.record;
        let flags = check_consistency(record);
        let flagged_criteria: Vec<Criterion> = flags.iter().map(|f| f.criterion).collect();

        let request =
            GenerationRequest::new(Capability::QualityAudit, self.model.clone(), self.build_prompt(snapshot))
                .json();
        let request = &request;
        let generator = self.generator.as_ref();

        let outcome = call_with_retry(
            Capability::QualityAudit,
            &self.policy,
            self.call_timeout,
            |_| async move {
                let completion = generator.generate(request).await?;
                let reply: AuditReply = parse_json_reply(&completion.text)?;
                DelegateResult::Ok((reply, completion.usage))
            },
        )
        .await;

        let (verdict, dimensions, meta_summary, usage) = match outcome.result {
            Ok((reply, usage)) => {
                let (dimensions, meta) = reply.dimensions();
                let summary = (!meta.key_weaknesses.is_empty()).then(|| meta.key_weaknesses.join("; "));
                let verdict = QualityVerdict {
                    status: AuditStatus::Completed,
                    overall_quality: Some(meta.overall_quality),
                    flagged_criteria,
                    summary,
                };
                (verdict, dimensions, Some(meta), usage)
            }
            Err(e) => {
                let verdict = QualityVerdict {
                    status: AuditStatus::Failed,
                    overall_quality: None,
                    flagged_criteria,
                    summary: Some(e.to_string()),
                };
                (verdict, BTreeMap::new(), None, None)
            }
        };

        AuditReport {
            track_id: record.track_id().to_string(),
            verdict,
            dimensions,
            meta_summary,
            consistency_flags: flags,
            usage,
            record_digest: record.digest(),
            evaluated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("artifact writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Destination for full audit reports.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn deliver(&self, report: &AuditReport) -> Result<(), ArtifactError>;
}

/// Logs each report as a structured event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn deliver(&self, report: &AuditReport) -> Result<(), ArtifactError> {
        info!(
            event = "audit.report",
            track_id = %report.track_id,
            status = ?report.verdict.status,
            overall_quality = ?report.verdict.overall_quality,
            flags = report.consistency_flags.len(),
            record_digest = %report.record_digest,
        );
        Ok(())
    }
}

/// Writes `meta_eval_<track>_<timestamp>.json` plus a `.digest` sidecar.
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    dir: PathBuf,
}

impl FileAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn sanitize(track_id: &str) -> String {
    track_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write the report and its digest sidecar. Returns the report path.
pub fn write_audit_artifact(report: &AuditReport, dir: &Path) -> Result<PathBuf, ArtifactError> {
    std::fs::create_dir_all(dir)?;
    let stem = format!(
        "meta_eval_{}_{}",
        sanitize(&report.track_id),
        report.evaluated_at.format("%Y%m%d_%H%M%S%3f")
    );
    let artifact_path = dir.join(format!("{stem}.json"));
    let digest_path = dir.join(format!("{stem}.digest"));

    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, sha256_hex(&json).as_bytes())?;
    Ok(artifact_path)
}

/// Read a report written by [`write_audit_artifact`] and verify its digest.
pub fn read_audit_artifact(artifact_path: &Path) -> Result<AuditReport, ArtifactError> {
    let digest_path = artifact_path.with_extension("digest");
    let json = std::fs::read(artifact_path)?;
    let expected = std::fs::read_to_string(&digest_path)?;
    let actual = sha256_hex(&json);
    if expected.trim() != actual {
        return Err(ArtifactError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn deliver(&self, report: &AuditReport) -> Result<(), ArtifactError> {
        let report = report.clone();
        let dir = self.dir.clone();
        let path =
            tokio::task::spawn_blocking(move || write_audit_artifact(&report, &dir)).await??;
        info!(event = "audit.artifact_written", path = %path.display());
        Ok(())
    }
}
