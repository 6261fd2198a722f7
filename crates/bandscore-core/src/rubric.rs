//! Rubric provider: band descriptors and assessment criteria per criterion and essay type.
//!
//! Rubric data is read-only and loaded once at startup. A missing
//! criterion/essay-type pair is a [`ConfigError`] caught by
//! [`validate_coverage`] before any request is served.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, Criterion, EssayType, TaskNumber};

const BUNDLED_RUBRIC: &str = include_str!("../data/rubric.json");

/// Descriptor text returned when a band is not present in the data.
pub const DESCRIPTOR_NOT_FOUND: &str = "Descriptor not found for given parameters.";

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricDocument {
    pub exams: BTreeMap<String, ExamRubric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRubric {
    pub tasks: BTreeMap<String, TaskRubric>,
    #[serde(default)]
    pub penalties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRubric {
    pub description: String,
    pub word_requirement: usize,
    pub criteria: BTreeMap<String, CriterionRubric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionRubric {
    #[serde(default)]
    pub common_assessment: Vec<String>,
    #[serde(default)]
    pub specific_assessment: Vec<String>,
    /// Keyed by whole band "1".."9".
    pub bands: BTreeMap<String, BandDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandDescriptor {
    pub common_descriptor: String,
    #[serde(default)]
    pub specific_descriptor: String,
    #[serde(default)]
    pub critical_negative_features: String,
}

// ---------------------------------------------------------------------------
// Excerpt handed to evaluators
// ---------------------------------------------------------------------------

/// Everything an evaluator needs to know about one criterion for one essay type.
#[derive(Debug, Clone, PartialEq)]
pub struct RubricExcerpt {
    pub criterion: Criterion,
    pub essay_type: EssayType,
    /// Criterion name as used in the rubric ("Task Response" for Task 2, ...).
    pub rubric_name: String,
    pub task_description: String,
    pub word_requirement: usize,
    pub assessment: Vec<String>,
    /// Keyed by whole band 1–9.
    pub bands: BTreeMap<u8, BandDescriptor>,
    pub penalties: Vec<String>,
}

impl RubricExcerpt {
    /// Descriptor for a whole band, as prompt text.
    pub fn band_descriptor_text(&self, band: u8) -> String {
        match self.bands.get(&band) {
            Some(descriptor) => format!(
                "{} - Band {band}: {}",
                self.rubric_name,
                render_descriptor(descriptor)
            ),
            None => DESCRIPTOR_NOT_FOUND.to_string(),
        }
    }

    /// Assessment guidance as a bulleted list.
    pub fn assessment_text(&self) -> String {
        let mut out = format!("When evaluating {} consider only:\n", self.rubric_name);
        for item in &self.assessment {
            let _ = writeln!(out, "- {item}");
        }
        out
    }

    /// Full prompt rendering: assessment guidance, all band descriptors, penalties.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "An essay must fully fit the positive features of the descriptor at a particular level."
        );
        let _ = writeln!(
            out,
            "Band descriptors for {} - {}:",
            self.essay_type, self.rubric_name
        );
        for (band, descriptor) in &self.bands {
            let _ = writeln!(out, "Band {band}: {}", render_descriptor(descriptor));
        }
        out.push('\n');
        out.push_str(&self.assessment_text());
        if !self.penalties.is_empty() {
            out.push_str("\nPenalties apply in these cases:\n");
            for penalty in &self.penalties {
                let _ = writeln!(out, "- {penalty}");
            }
        }
        out
    }
}

fn render_descriptor(descriptor: &BandDescriptor) -> String {
    let mut parts = vec![descriptor.common_descriptor.trim().to_string()];
    if !descriptor.specific_descriptor.trim().is_empty() {
        parts.push(format!("Specific: {}", descriptor.specific_descriptor.trim()));
    }
    if !descriptor.critical_negative_features.trim().is_empty() {
        parts.push(format!(
            "Limited by: {}",
            descriptor.critical_negative_features.trim()
        ));
    }
    parts.join(" ")
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Read-only rubric lookup.
pub trait RubricProvider: Send + Sync {
    fn describe_criterion(
        &self,
        criterion: Criterion,
        essay_type: EssayType,
    ) -> Result<RubricExcerpt, ConfigError>;

    /// Descriptor for one whole band, or [`DESCRIPTOR_NOT_FOUND`].
    fn target_band_descriptor(&self, criterion: Criterion, essay_type: EssayType, band: u8) -> String {
        self.describe_criterion(criterion, essay_type)
            .map(|excerpt| excerpt.band_descriptor_text(band))
            .unwrap_or_else(|_| DESCRIPTOR_NOT_FOUND.to_string())
    }
}

/// Rubric backed by a JSON document.
#[derive(Debug, Clone)]
pub struct JsonRubricProvider {
    document: RubricDocument,
}

impl JsonRubricProvider {
    pub fn new(document: RubricDocument) -> Self {
        Self { document }
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let document: RubricDocument = serde_json::from_str(input)
            .map_err(|e| ConfigError::InvalidRubric(e.to_string()))?;
        Ok(Self::new(document))
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// The rubric shipped with the crate.
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::from_json_str(BUNDLED_RUBRIC)
    }

    pub fn document(&self) -> &RubricDocument {
        &self.document
    }

    fn task(&self, essay_type: EssayType) -> Option<(&ExamRubric, &TaskRubric)> {
        let exam = self.document.exams.get(essay_type.exam().label())?;
        let task = exam.tasks.get(essay_type.task().label())?;
        Some((exam, task))
    }
}

impl RubricProvider for JsonRubricProvider {
    fn describe_criterion(
        &self,
        criterion: Criterion,
        essay_type: EssayType,
    ) -> Result<RubricExcerpt, ConfigError> {
        let rubric_name = criterion.rubric_name(essay_type.task());
        let missing = || ConfigError::MissingRubric {
            criterion: rubric_name.to_string(),
            essay_type: essay_type.to_string(),
        };

        let (exam, task) = self.task(essay_type).ok_or_else(missing)?;
        let data = task.criteria.get(rubric_name).ok_or_else(missing)?;

        let mut bands = BTreeMap::new();
        for (key, descriptor) in &data.bands {
            let band: u8 = key.trim().parse().map_err(|_| {
                ConfigError::InvalidRubric(format!(
                    "band key {key:?} under {rubric_name} / {essay_type} is not a whole band"
                ))
            })?;
            if !(1..=9).contains(&band) {
                return Err(ConfigError::InvalidRubric(format!(
                    "band {band} under {rubric_name} / {essay_type} is outside 1-9"
                )));
            }
            bands.insert(band, descriptor.clone());
        }
        if bands.is_empty() {
            return Err(missing());
        }

        let assessment = data
            .common_assessment
            .iter()
            .chain(&data.specific_assessment)
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect();

        Ok(RubricExcerpt {
            criterion,
            essay_type,
            rubric_name: rubric_name.to_string(),
            task_description: task.description.clone(),
            word_requirement: task.word_requirement,
            assessment,
            bands,
            penalties: exam.penalties.clone(),
        })
    }
}

/// Fail unless every criterion × essay type pair resolves.
pub fn validate_coverage(provider: &dyn RubricProvider) -> Result<(), ConfigError> {
    for essay_type in EssayType::ALL {
        for criterion in Criterion::ALL {
            provider.describe_criterion(criterion, essay_type)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Word-count guidance
// ---------------------------------------------------------------------------

/// Adjustment to the task score implied by essay length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCountPenalty {
    None,
    /// Reduce by half a band.
    Slight,
    /// Reduce by one band or more.
    Stronger,
    /// Task score must not exceed Band 5.
    CapAtFive,
}

impl WordCountPenalty {
    pub fn assess(task: TaskNumber, word_requirement: usize, word_count: usize) -> Self {
        let (slack, floor) = match task {
            TaskNumber::One => (10, 100),
            TaskNumber::Two => (20, 200),
        };
        if word_count >= word_requirement {
            WordCountPenalty::None
        } else if word_count < floor {
            WordCountPenalty::CapAtFive
        } else if word_requirement - word_count <= slack {
            WordCountPenalty::Slight
        } else {
            WordCountPenalty::Stronger
        }
    }

    fn instruction(&self, criterion_name: &str) -> String {
        match self {
            WordCountPenalty::None => "no word count penalty applies.".to_string(),
            WordCountPenalty::Slight => format!("REDUCE the {criterion_name} band score by 0.5."),
            WordCountPenalty::Stronger => format!(
                "REDUCE the {criterion_name} band score by 1 band or more depending on the impact on the task."
            ),
            WordCountPenalty::CapAtFive => {
                format!("the {criterion_name} band score must NOT exceed Band 5.")
            }
        }
    }
}

/// Word-count line for the task criterion prompt.
pub fn word_count_guidance(excerpt: &RubricExcerpt, word_count: usize) -> String {
    let penalty =
        WordCountPenalty::assess(excerpt.essay_type.task(), excerpt.word_requirement, word_count);
    format!(
        "The minimum words required for this task is {}. This essay has {} words: {}",
        excerpt.word_requirement,
        word_count,
        penalty.instruction(&excerpt.rubric_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_rubric_covers_every_pair() {
        let provider = JsonRubricProvider::bundled().unwrap();
        validate_coverage(&provider).unwrap();
    }

    #[test]
    fn test_task_criterion_name_follows_task_number() {
        let provider = JsonRubricProvider::bundled().unwrap();
        let t1 = provider
            .describe_criterion(Criterion::TaskAchievement, EssayType::AcademicTask1)
            .unwrap();
        assert_eq!(t1.rubric_name, "Task Achievement");
        assert_eq!(t1.word_requirement, 150);

        let t2 = provider
            .describe_criterion(Criterion::TaskAchievement, EssayType::GeneralTask2)
            .unwrap();
        assert_eq!(t2.rubric_name, "Task Response");
        assert_eq!(t2.word_requirement, 250);
        assert_eq!(t2.bands.len(), 9);
    }

    #[test]
    fn test_target_band_descriptor_falls_back() {
        let provider = JsonRubricProvider::bundled().unwrap();
        let text = provider.target_band_descriptor(Criterion::Grammar, EssayType::AcademicTask2, 7);
        assert!(text.starts_with("Grammatical Range & Accuracy - Band 7"));
        let missing = provider.target_band_descriptor(Criterion::Grammar, EssayType::AcademicTask2, 0);
        assert_eq!(missing, DESCRIPTOR_NOT_FOUND);
    }

    #[test]
    fn test_missing_pair_is_config_error() {
        let provider = JsonRubricProvider::from_json_str(r#"{"exams": {}}"#).unwrap();
        let err = validate_coverage(&provider).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRubric { .. }));
    }

    #[test]
    fn test_malformed_json_is_invalid_rubric() {
        let err = JsonRubricProvider::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRubric(_)));
    }

    #[test]
    fn test_word_count_penalty_thresholds() {
        use WordCountPenalty::*;
        assert_eq!(WordCountPenalty::assess(TaskNumber::One, 150, 150), None);
        assert_eq!(WordCountPenalty::assess(TaskNumber::One, 150, 140), Slight);
        assert_eq!(WordCountPenalty::assess(TaskNumber::One, 150, 139), Stronger);
        assert_eq!(WordCountPenalty::assess(TaskNumber::One, 150, 100), Stronger);
        assert_eq!(WordCountPenalty::assess(TaskNumber::One, 150, 99), CapAtFive);
        assert_eq!(WordCountPenalty::assess(TaskNumber::Two, 250, 230), Slight);
        assert_eq!(WordCountPenalty::assess(TaskNumber::Two, 250, 229), Stronger);
        assert_eq!(WordCountPenalty::assess(TaskNumber::Two, 250, 199), CapAtFive);
    }

    #[test]
    fn test_render_includes_bands_and_penalties() {
        let provider = JsonRubricProvider::bundled().unwrap();
        let excerpt = provider
            .describe_criterion(Criterion::LexicalResource, EssayType::GeneralTask1)
            .unwrap();
        let text = excerpt.render();
        assert!(text.contains("Band 1:"));
        assert!(text.contains("Band 9:"));
        assert!(text.contains("Penalties apply"));
        assert!(text.contains("Lexical Resource"));
    }
}
