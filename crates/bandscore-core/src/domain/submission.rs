//! Essay submissions and essay-type mapping.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::band::Band;
use crate::domain::error::ValidationError;

/// Exam variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExamType {
    GeneralTraining,
    Academic,
}

impl ExamType {
    /// Label used as the top-level key in rubric data.
    pub fn label(&self) -> &'static str {
        match self {
            ExamType::GeneralTraining => "General Training",
            ExamType::Academic => "Academic",
        }
    }
}

/// Writing task within an exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskNumber {
    One,
    Two,
}

impl TaskNumber {
    /// Label used as the task key in rubric data.
    pub fn label(&self) -> &'static str {
        match self {
            TaskNumber::One => "Task 1",
            TaskNumber::Two => "Task 2",
        }
    }
}

/// Writing task type. On the wire either the code 1–4 or the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "EssayTypeRepr", into = "u8")]
pub enum EssayType {
    GeneralTask1,
    GeneralTask2,
    AcademicTask1,
    AcademicTask2,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EssayTypeRepr {
    Code(u8),
    Name(String),
}

impl EssayType {
    pub const ALL: [EssayType; 4] = [
        EssayType::GeneralTask1,
        EssayType::GeneralTask2,
        EssayType::AcademicTask1,
        EssayType::AcademicTask2,
    ];

    pub fn from_code(code: u8) -> Result<Self, ValidationError> {
        match code {
            1 => Ok(EssayType::GeneralTask1),
            2 => Ok(EssayType::GeneralTask2),
            3 => Ok(EssayType::AcademicTask1),
            4 => Ok(EssayType::AcademicTask2),
            other => Err(ValidationError::UnknownEssayType {
                value: other.to_string(),
            }),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            EssayType::GeneralTask1 => 1,
            EssayType::GeneralTask2 => 2,
            EssayType::AcademicTask1 => 3,
            EssayType::AcademicTask2 => 4,
        }
    }

    pub fn exam(&self) -> ExamType {
        match self {
            EssayType::GeneralTask1 | EssayType::GeneralTask2 => ExamType::GeneralTraining,
            EssayType::AcademicTask1 | EssayType::AcademicTask2 => ExamType::Academic,
        }
    }

    pub fn task(&self) -> TaskNumber {
        match self {
            EssayType::GeneralTask1 | EssayType::AcademicTask1 => TaskNumber::One,
            EssayType::GeneralTask2 | EssayType::AcademicTask2 => TaskNumber::Two,
        }
    }

    pub fn is_task1(&self) -> bool {
        self.task() == TaskNumber::One
    }
}

impl fmt::Display for EssayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Writing {}", self.exam().label(), self.task().label())
    }
}

impl TryFrom<EssayTypeRepr> for EssayType {
    type Error = ValidationError;

    fn try_from(repr: EssayTypeRepr) -> Result<Self, Self::Error> {
        match repr {
            EssayTypeRepr::Code(code) => EssayType::from_code(code),
            EssayTypeRepr::Name(name) => match name.as_str() {
                "GeneralTask1" => Ok(EssayType::GeneralTask1),
                "GeneralTask2" => Ok(EssayType::GeneralTask2),
                "AcademicTask1" => Ok(EssayType::AcademicTask1),
                "AcademicTask2" => Ok(EssayType::AcademicTask2),
                _ => Err(ValidationError::UnknownEssayType { value: name }),
            },
        }
    }
}

impl From<EssayType> for u8 {
    fn from(essay_type: EssayType) -> Self {
        essay_type.code()
    }
}

/// An essay submitted for evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EssaySubmission {
    /// Caller-supplied correlation token, echoed back unchanged.
    #[serde(alias = "track_id")]
    pub track_id: String,
    pub question: String,
    pub essay: String,
    #[serde(alias = "essay_type")]
    pub essay_type: EssayType,
    /// Calibrates gap analysis only; never used to adjust scores.
    #[serde(alias = "target_band")]
    pub target_band: Band,
    #[serde(default, alias = "image_url", skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
    #[serde(default, alias = "image_description", skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
}

impl EssaySubmission {
    pub fn new(
        track_id: impl Into<String>,
        question: impl Into<String>,
        essay: impl Into<String>,
        essay_type: EssayType,
        target_band: Band,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            question: question.into(),
            essay: essay.into(),
            essay_type,
            target_band,
            image_reference: None,
            image_description: None,
        }
    }

    pub fn with_image_reference(mut self, reference: impl Into<String>) -> Self {
        self.image_reference = Some(reference.into());
        self
    }

    pub fn with_image_description(mut self, description: impl Into<String>) -> Self {
        self.image_description = Some(description.into());
        self
    }

    /// Reject malformed submissions before any delegate is invoked.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let track_len = self.track_id.trim().chars().count();
        if track_len < 3 {
            return Err(ValidationError::TrackIdTooShort { len: track_len });
        }
        if self.question.trim().is_empty() {
            return Err(ValidationError::EmptyQuestion);
        }
        if self.essay.trim().is_empty() {
            return Err(ValidationError::EmptyEssay);
        }
        Ok(())
    }

    /// The caller's description of the visual prompt, if it carries any content.
    ///
    /// Empty strings and the literal `null` count as absent.
    pub fn supplied_description(&self) -> Option<&str> {
        self.image_description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("null"))
    }

    pub fn image_reference(&self) -> Option<&str> {
        self.image_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Task-1 item with an image reference and no usable description.
    pub fn needs_image_description(&self) -> bool {
        self.essay_type.is_task1()
            && self.image_reference().is_some()
            && self.supplied_description().is_none()
    }

    pub fn word_count(&self) -> usize {
        self.essay.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(essay_type: EssayType) -> EssaySubmission {
        EssaySubmission::new(
            "track-001",
            "Describe the chart.",
            "The chart shows rising sales.",
            essay_type,
            Band::new(7.0).unwrap(),
        )
    }

    #[test]
    fn test_essay_type_mapping() {
        assert_eq!(EssayType::GeneralTask1.exam(), ExamType::GeneralTraining);
        assert_eq!(EssayType::AcademicTask2.exam(), ExamType::Academic);
        assert_eq!(EssayType::AcademicTask1.task(), TaskNumber::One);
        assert_eq!(EssayType::GeneralTask2.task(), TaskNumber::Two);
        assert_eq!(
            EssayType::AcademicTask1.to_string(),
            "Academic Writing Task 1"
        );
    }

    #[test]
    fn test_essay_type_wire_forms() {
        let from_code: EssayType = serde_json::from_str("3").unwrap();
        assert_eq!(from_code, EssayType::AcademicTask1);
        let from_name: EssayType = serde_json::from_str("\"GeneralTask2\"").unwrap();
        assert_eq!(from_name, EssayType::GeneralTask2);
        assert!(serde_json::from_str::<EssayType>("0").is_err());
        assert!(serde_json::from_str::<EssayType>("5").is_err());
        assert!(serde_json::from_str::<EssayType>("2.5").is_err());
        assert!(serde_json::from_str::<EssayType>("\"two\"").is_err());
        assert_eq!(serde_json::to_string(&EssayType::AcademicTask2).unwrap(), "4");
    }

    #[test]
    fn test_submission_accepts_snake_case_payload() {
        let json = r#"{
            "track_id": "abc-123",
            "question": "Q",
            "essay": "E",
            "essay_type": 1,
            "target_band": 6.5,
            "image_url": "https://example.com/chart.png"
        }"#;
        let parsed: EssaySubmission = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.track_id, "abc-123");
        assert_eq!(parsed.essay_type, EssayType::GeneralTask1);
        assert_eq!(parsed.image_reference(), Some("https://example.com/chart.png"));
    }

    #[test]
    fn test_validation_rejects_short_track_id_and_empty_text() {
        let mut s = submission(EssayType::GeneralTask2);
        s.track_id = "ab".into();
        assert_eq!(s.validate(), Err(ValidationError::TrackIdTooShort { len: 2 }));

        let mut s = submission(EssayType::GeneralTask2);
        s.question = "   ".into();
        assert_eq!(s.validate(), Err(ValidationError::EmptyQuestion));

        let mut s = submission(EssayType::GeneralTask2);
        s.essay = String::new();
        assert_eq!(s.validate(), Err(ValidationError::EmptyEssay));

        assert!(submission(EssayType::GeneralTask2).validate().is_ok());
    }

    #[test]
    fn test_needs_image_description() {
        let task1 = submission(EssayType::AcademicTask1).with_image_reference("https://x/y.png");
        assert!(task1.needs_image_description());

        let described = task1.clone().with_image_description("A bar chart of sales.");
        assert!(!described.needs_image_description());

        let null_description = task1.clone().with_image_description("null");
        assert!(null_description.needs_image_description());

        let task2 = submission(EssayType::AcademicTask2).with_image_reference("https://x/y.png");
        assert!(!task2.needs_image_description());

        assert!(!submission(EssayType::AcademicTask1).needs_image_description());
    }
}
