//! Prompt templates and tolerant parsing of delegate JSON answers.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::domain::{DelegateError, DelegateResult, EssayType};
use crate::rubric::RubricExcerpt;

/// Marker given to evaluators when the visual prompt could not be described.
pub const DESCRIPTION_UNAVAILABLE: &str = "[image description unavailable]";

const COMMENT_SECTIONS: &str = "**General Comments:**\n\
**You did very well:**\n\
**Need to improve:**\n\
**Examples of errors:**\n\
**How to improve your score:**";

/// Inputs shared by every criterion prompt.
pub struct CriterionPromptInput<'a> {
    pub focus: &'a str,
    pub essay: &'a str,
    pub question: &'a str,
    pub excerpt: &'a RubricExcerpt,
    /// Present only for Task-1 items with a visual prompt.
    pub image_description: Option<&'a str>,
    /// Present only for the task criterion.
    pub word_count_guidance: Option<&'a str>,
}

pub fn criterion_prompt(input: &CriterionPromptInput<'_>) -> String {
    let CriterionPromptInput {
        focus,
        essay,
        question,
        excerpt,
        image_description,
        word_count_guidance,
    } = input;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are an expert IELTS examiner specialising in {focus} in writing.\n\
         Evaluate the essay below strictly according to the IELTS {focus} assessment criteria.\n"
    );
    let _ = writeln!(out, "Essay:\n{essay}\n");
    let _ = writeln!(out, "Question:\n{question}\n");
    let _ = writeln!(out, "Task Description:\n{}\n", excerpt.task_description);
    if let Some(description) = image_description {
        let _ = writeln!(out, "Image Description:\n{description}\n");
    }
    if let Some(guidance) = word_count_guidance {
        let _ = writeln!(out, "Word Count:\n{guidance}\n");
    }
    let _ = writeln!(out, "Rubric:\n{}", excerpt.render());
    let _ = writeln!(
        out,
        "Format the comment in markdown with these sections:\n{COMMENT_SECTIONS}\n"
    );
    let _ = writeln!(
        out,
        "Instructions:\n\
         1. Assign a band score from 0 to 9 in steps of 0.5 based strictly on {focus}.\n\
         2. Give concise, non-redundant comments explaining the score.\n\
         3. Highlight specific strengths and weaknesses, quoting the essay where relevant.\n\
         4. Suggest actionable improvements. Use Australian English.\n\n\
         Answer with a single JSON object and nothing else:\n\
         {{\"score\": <number>, \"comment\": \"<markdown feedback>\"}}"
    );
    out
}

pub fn describer_prompt() -> String {
    "Provide a short summary of the context of the image.\n\
     Identify the type of image (diagram, graph, table, chart, map or other).\n\
     Only provide factual content about the visual: trends, components, colour coding.\n\
     Keep the summary to no more than 3 sentences.\n\
     If it is not a single image or you are unable to describe it, answer with an empty message."
        .to_string()
}

/// One criterion's score and comment as shown to the auditor.
pub struct AuditedCriterion<'a> {
    pub name: &'a str,
    pub score: Option<String>,
    pub comment: &'a str,
    pub descriptor: String,
}

pub struct AuditPromptInput<'a> {
    pub track_id: &'a str,
    pub essay: &'a str,
    pub question: &'a str,
    pub essay_type: EssayType,
    pub criteria: Vec<AuditedCriterion<'a>>,
}

pub fn audit_prompt(input: &AuditPromptInput<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are a senior IELTS examiner and evaluation specialist.\n\
         Critically evaluate the feedback produced by specialised examiners for the essay below.\n"
    );
    let _ = writeln!(out, "Essay type: {}\n", input.essay_type);
    let _ = writeln!(out, "Essay:\n{}\n", input.essay);
    let _ = writeln!(out, "Question:\n{}\n", input.question);
    out.push_str("Examiner output:\n");
    for c in &input.criteria {
        let score = c.score.as_deref().unwrap_or("not assessed");
        let _ = writeln!(
            out,
            "* {} (band {score}):\n{}\n  Rubric at this band: {}\n",
            c.name, c.comment, c.descriptor
        );
    }
    let _ = writeln!(
        out,
        "Judge the examiner output only as an evaluation, not as an essay.\n\
         Score every dimension between 0 and 1 and answer with a single JSON object:\n\
         {{\n\
           \"task_accuracy\": {{\"criterion_alignment\": 0.0, \"score_validity\": 0.0, \"content_understanding\": 0.0, \"evidence_reference\": 0.0}},\n\
           \"grammar_eval_quality\": {{\"error_detection_accuracy\": 0.0, \"error_explanation_quality\": 0.0, \"band_alignment\": 0.0, \"coverage\": 0.0}},\n\
           \"lexical_eval_quality\": {{\"range_assessment_accuracy\": 0.0, \"appropriacy_assessment\": 0.0, \"error_identification\": 0.0, \"band_alignment\": 0.0}},\n\
           \"coherence_eval_quality\": {{\"structure_analysis\": 0.0, \"linking_accuracy\": 0.0, \"clarity_of_reasoning\": 0.0, \"band_alignment\": 0.0}},\n\
           \"feedback_quality\": {{\"clarity\": 0.0, \"specificity\": 0.0, \"constructiveness\": 0.0, \"score_comment_alignment\": 0.0, \"rubric_coverage\": 0.0}},\n\
           \"meta_summary\": {{\"overall_quality\": 0.0, \"key_strengths\": [], \"key_weaknesses\": [], \"improvement_suggestions\": []}},\n\
           \"track_id\": \"{}\"\n\
         }}",
        input.track_id
    );
    out
}

/// One ranked weak criterion as shown to the gap-analysis delegate.
pub struct GapPromptCriterion<'a> {
    pub key: &'a str,
    pub name: &'a str,
    pub score: String,
    pub comment: &'a str,
    pub target_descriptor: String,
    pub assessment: String,
}

pub fn gap_prompt(overall: &str, target: &str, criteria: &[GapPromptCriterion<'_>]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are a senior IELTS teacher.\n\
         The student's current overall band is {overall}; the target is Band {target}.\n\
         Compare the examiner comments with the target band descriptors and assessment guidelines below.\n"
    );
    for c in criteria {
        let _ = writeln!(
            out,
            "## {} (key \"{}\", current band {})\nExaminer comment:\n{}\nTarget band descriptor:\n{}\nAssessment guidelines:\n{}",
            c.name, c.key, c.score, c.comment, c.target_descriptor, c.assessment
        );
    }
    let _ = writeln!(
        out,
        "Write 1 to 2 concise, practical, teacher-style suggestions per criterion that help the student reach Band {target}.\n\
         Do not repeat the examiner comments and do not mention the examiner. Use Australian English.\n\
         Answer with a single JSON object keyed by the criterion keys above, each mapping to a list of suggestions:\n\
         {{\"<key>\": [\"suggestion\", \"suggestion\"]}}"
    );
    out
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// Extract the JSON object embedded in a model answer.
///
/// Accepts bare JSON, fenced code blocks, and objects surrounded by prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let body = fence_regex()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

/// Parse a model answer into `T`, mapping every failure to [`DelegateError::Malformed`].
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> DelegateResult<T> {
    let json = extract_json(text)
        .ok_or_else(|| DelegateError::Malformed("answer contains no JSON object".to_string()))?;
    serde_json::from_str(json).map_err(|e| DelegateError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Criterion;
    use crate::rubric::{JsonRubricProvider, RubricProvider};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        score: f64,
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"score": 6}"#), Some(r#"{"score": 6}"#));
        assert_eq!(
            extract_json("```json\n{\"score\": 6}\n```"),
            Some("{\"score\": 6}")
        );
        assert_eq!(
            extract_json("Here you go: {\"score\": 6} hope it helps"),
            Some("{\"score\": 6}")
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_json_reply_maps_errors_to_malformed() {
        let ok: Reply = parse_json_reply("```\n{\"score\": 7.5}\n```").unwrap();
        assert_eq!(ok, Reply { score: 7.5 });

        let err = parse_json_reply::<Reply>("{\"grade\": 7}").unwrap_err();
        assert!(matches!(err, DelegateError::Malformed(_)));
        let err = parse_json_reply::<Reply>("seven").unwrap_err();
        assert!(matches!(err, DelegateError::Malformed(_)));
    }

    #[test]
    fn test_criterion_prompt_sections() {
        let provider = JsonRubricProvider::bundled().unwrap();
        let excerpt = provider
            .describe_criterion(Criterion::TaskAchievement, EssayType::AcademicTask1)
            .unwrap();
        let prompt = criterion_prompt(&CriterionPromptInput {
            focus: "Task Achievement",
            essay: "The chart shows...",
            question: "Summarise the chart.",
            excerpt: &excerpt,
            image_description: Some(DESCRIPTION_UNAVAILABLE),
            word_count_guidance: Some("The minimum words required for this task is 150."),
        });
        assert!(prompt.contains("Image Description:\n[image description unavailable]"));
        assert!(prompt.contains("Word Count:"));
        assert!(prompt.contains("**How to improve your score:**"));
        assert!(prompt.contains("\"score\""));
    }
}
