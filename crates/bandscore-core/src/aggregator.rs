//! Merges criterion results into one evaluation record.
//!
//! [`aggregate`] is pure: given the same results it always produces the same
//! record or the same failure.

use std::collections::BTreeMap;

use tracing::warn;

use crate::domain::{
    Criterion, CriterionResult, CriterionStatus, EvaluationError, EvaluationRecord, EvaluationResult,
};

/// How many unhealthy criteria a record may carry and still be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationPolicy {
    pub max_unhealthy: usize,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self { max_unhealthy: 1 }
    }
}

/// Build the record, or fail when too many criteria are degraded or missing.
///
/// Criteria absent from `results` are filled in as `Missing`. When a criterion
/// appears twice the first result wins.
pub fn aggregate(
    track_id: &str,
    results: Vec<CriterionResult>,
    image_description: Option<String>,
    policy: AggregationPolicy,
) -> EvaluationResult<EvaluationRecord> {
    let mut by_criterion: BTreeMap<Criterion, CriterionResult> = BTreeMap::new();
    for result in results {
        let criterion = result.criterion();
        if by_criterion.contains_key(&criterion) {
            warn!(track_id = %track_id, criterion = %criterion, "duplicate criterion result ignored");
            continue;
        }
        by_criterion.insert(criterion, result);
    }
    for criterion in Criterion::ALL {
        by_criterion
            .entry(criterion)
            .or_insert_with(|| CriterionResult::missing(criterion));
    }

    let with_status = |status: CriterionStatus| -> Vec<Criterion> {
        by_criterion
            .values()
            .filter(|r| r.status() == status)
            .map(CriterionResult::criterion)
            .collect()
    };
    let degraded = with_status(CriterionStatus::Degraded);
    let missing = with_status(CriterionStatus::Missing);
    let unhealthy = degraded.len() + missing.len();

    if unhealthy > policy.max_unhealthy {
        return Err(EvaluationError::Aggregation {
            unhealthy,
            threshold: policy.max_unhealthy,
            degraded,
            missing,
        });
    }

    Ok(EvaluationRecord::new(
        track_id.to_string(),
        by_criterion,
        image_description,
    ))
}
