//! The four fixed assessment criteria and their per-criterion results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::band::Band;
use crate::domain::error::ValidationError;
use crate::domain::submission::TaskNumber;

/// One of the four rubric criteria.
///
/// Variants are declared in gap-analysis priority order, so the derived
/// `Ord` doubles as the tie-break: Task > Coherence > Lexical > Grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    TaskAchievement,
    CoherenceCohesion,
    LexicalResource,
    Grammar,
}

impl Criterion {
    /// All criteria in priority order.
    pub const ALL: [Criterion; 4] = [
        Criterion::TaskAchievement,
        Criterion::CoherenceCohesion,
        Criterion::LexicalResource,
        Criterion::Grammar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::TaskAchievement => "task_achievement",
            Criterion::CoherenceCohesion => "coherence_cohesion",
            Criterion::LexicalResource => "lexical_resource",
            Criterion::Grammar => "grammar",
        }
    }

    /// Human-readable name used in feedback text.
    pub fn display_name(&self) -> &'static str {
        match self {
            Criterion::TaskAchievement => "Task Achievement",
            Criterion::CoherenceCohesion => "Coherence & Cohesion",
            Criterion::LexicalResource => "Lexical Resource",
            Criterion::Grammar => "Grammatical Range & Accuracy",
        }
    }

    /// Name of the criterion in the rubric data.
    ///
    /// The task criterion is "Task Achievement" for Task 1 and "Task Response" for Task 2.
    pub fn rubric_name(&self, task: TaskNumber) -> &'static str {
        match (self, task) {
            (Criterion::TaskAchievement, TaskNumber::One) => "Task Achievement",
            (Criterion::TaskAchievement, TaskNumber::Two) => "Task Response",
            (other, _) => other.display_name(),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criterion {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalised.as_str() {
            "task_achievement" | "task_response" | "task" => Ok(Criterion::TaskAchievement),
            "coherence_cohesion" | "coherence_&_cohesion" | "coherence" => {
                Ok(Criterion::CoherenceCohesion)
            }
            "lexical_resource" | "lexical" => Ok(Criterion::LexicalResource),
            "grammar" | "grammatical_range_&_accuracy" => Ok(Criterion::Grammar),
            _ => Err(ValidationError::UnknownCriterion {
                value: s.to_string(),
            }),
        }
    }
}

/// Outcome classification for one criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    /// The delegate returned a well-formed score and comment.
    Ok,
    /// The delegate kept failing until retries were exhausted.
    Degraded,
    /// No result arrived before the evaluation deadline.
    Missing,
}

/// Result of evaluating one criterion. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionResult {
    criterion_name: Criterion,
    score: Option<Band>,
    comment: Option<String>,
    status: CriterionStatus,
    attempts: u32,
}

impl CriterionResult {
    pub fn ok(criterion: Criterion, score: Band, comment: impl Into<String>, attempts: u32) -> Self {
        Self {
            criterion_name: criterion,
            score: Some(score),
            comment: Some(comment.into()),
            status: CriterionStatus::Ok,
            attempts,
        }
    }

    pub fn degraded(criterion: Criterion, reason: impl fmt::Display, attempts: u32) -> Self {
        Self {
            criterion_name: criterion,
            score: None,
            comment: Some(format!("Assessment unavailable: {reason}")),
            status: CriterionStatus::Degraded,
            attempts,
        }
    }

    pub fn missing(criterion: Criterion) -> Self {
        Self {
            criterion_name: criterion,
            score: None,
            comment: None,
            status: CriterionStatus::Missing,
            attempts: 0,
        }
    }

    pub fn criterion(&self) -> Criterion {
        self.criterion_name
    }

    pub fn score(&self) -> Option<Band> {
        self.score
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn status(&self) -> CriterionStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Degraded or missing.
    pub fn is_unhealthy(&self) -> bool {
        self.status != CriterionStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_follows_declaration() {
        let mut shuffled = vec![
            Criterion::Grammar,
            Criterion::TaskAchievement,
            Criterion::LexicalResource,
            Criterion::CoherenceCohesion,
        ];
        shuffled.sort();
        assert_eq!(shuffled, Criterion::ALL.to_vec());
    }

    #[test]
    fn test_task_criterion_rubric_name_depends_on_task() {
        assert_eq!(
            Criterion::TaskAchievement.rubric_name(TaskNumber::One),
            "Task Achievement"
        );
        assert_eq!(
            Criterion::TaskAchievement.rubric_name(TaskNumber::Two),
            "Task Response"
        );
        assert_eq!(
            Criterion::Grammar.rubric_name(TaskNumber::Two),
            "Grammatical Range & Accuracy"
        );
    }

    #[test]
    fn test_criterion_parses_common_spellings() {
        assert_eq!("Task Response".parse::<Criterion>().unwrap(), Criterion::TaskAchievement);
        assert_eq!(
            "Coherence & Cohesion".parse::<Criterion>().unwrap(),
            Criterion::CoherenceCohesion
        );
        assert_eq!("lexical".parse::<Criterion>().unwrap(), Criterion::LexicalResource);
        assert_eq!(
            "Grammatical Range & Accuracy".parse::<Criterion>().unwrap(),
            Criterion::Grammar
        );
        assert!("spelling".parse::<Criterion>().is_err());
    }

    #[test]
    fn test_result_constructors_set_status() {
        let ok = CriterionResult::ok(Criterion::Grammar, Band::new(6.0).unwrap(), "fine", 1);
        assert_eq!(ok.status(), CriterionStatus::Ok);
        assert!(!ok.is_unhealthy());

        let degraded = CriterionResult::degraded(Criterion::Grammar, "timeout", 5);
        assert_eq!(degraded.status(), CriterionStatus::Degraded);
        assert!(degraded.score().is_none());
        assert!(degraded.comment().unwrap().contains("timeout"));

        let missing = CriterionResult::missing(Criterion::Grammar);
        assert!(missing.is_unhealthy());
        assert_eq!(missing.attempts(), 0);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let ok = CriterionResult::ok(Criterion::LexicalResource, Band::new(7.5).unwrap(), "good", 2);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["criterionName"], "lexical_resource");
        assert_eq!(json["score"], 7.5);
        assert_eq!(json["status"], "ok");
    }
}
