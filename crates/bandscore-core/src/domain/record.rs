//! The aggregated evaluation record returned to the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::band::Band;
use crate::domain::criterion::{Criterion, CriterionResult, CriterionStatus};

/// Placeholder feedback until gap analysis has run.
pub const FEEDBACK_NOT_GENERATED: &str = "Overall Feedback Not Generated";

/// Roll-up of the criterion statuses in a deliverable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// All four criteria are `Ok`.
    Complete,
    /// Some criteria are degraded or missing, within the configured threshold.
    Degraded,
}

/// Progress of the advisory quality audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Completed,
    Failed,
    /// The audit was still running when the response was returned.
    Pending,
}

/// Advisory verdict from the quality auditor. Never affects deliverability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityVerdict {
    pub status: AuditStatus,
    /// Overall quality of the evaluation in 0–1, when the audit delegate answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_quality: Option<f64>,
    /// Criteria whose comment contradicts the numeric score.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flagged_criteria: Vec<Criterion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl QualityVerdict {
    pub fn pending() -> Self {
        Self {
            status: AuditStatus::Pending,
            overall_quality: None,
            flagged_criteria: Vec::new(),
            summary: None,
        }
    }
}

/// A deliverable evaluation of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    track_id: String,
    status: RecordStatus,
    criteria: BTreeMap<Criterion, CriterionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    overall_band: Option<Band>,
    overall_feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality_verdict: Option<QualityVerdict>,
}

impl EvaluationRecord {
    /// Build a record from exactly one result per criterion.
    pub(crate) fn new(
        track_id: String,
        criteria: BTreeMap<Criterion, CriterionResult>,
        image_description: Option<String>,
    ) -> Self {
        let status = if criteria.values().all(|r| !r.is_unhealthy()) {
            RecordStatus::Complete
        } else {
            RecordStatus::Degraded
        };
        Self {
            track_id,
            status,
            criteria,
            image_description,
            overall_band: None,
            overall_feedback: FEEDBACK_NOT_GENERATED.to_string(),
            quality_verdict: None,
        }
    }

    pub(crate) fn with_feedback(mut self, overall_band: Option<Band>, feedback: String) -> Self {
        self.overall_band = overall_band;
        self.overall_feedback = feedback;
        self
    }

    pub(crate) fn with_quality_verdict(mut self, verdict: QualityVerdict) -> Self {
        self.quality_verdict = Some(verdict);
        self
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn criterion(&self, criterion: Criterion) -> Option<&CriterionResult> {
        self.criteria.get(&criterion)
    }

    /// Results in priority order.
    pub fn criteria(&self) -> impl Iterator<Item = &CriterionResult> {
        self.criteria.values()
    }

    pub fn image_description(&self) -> Option<&str> {
        self.image_description.as_deref()
    }

    pub fn overall_band(&self) -> Option<Band> {
        self.overall_band
    }

    pub fn overall_feedback(&self) -> &str {
        &self.overall_feedback
    }

    pub fn quality_verdict(&self) -> Option<&QualityVerdict> {
        self.quality_verdict.as_ref()
    }

    pub fn criteria_with_status(&self, status: CriterionStatus) -> Vec<Criterion> {
        self.criteria
            .values()
            .filter(|r| r.status() == status)
            .map(CriterionResult::criterion)
            .collect()
    }

    /// SHA-256 hex digest of the canonical JSON form.
    pub fn digest(&self) -> String {
        // Field order is fixed and criteria are keyed by a BTreeMap, so the
        // serialisation is canonical.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
