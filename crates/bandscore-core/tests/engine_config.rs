//! Orchestrator assembly: configuration files, overrides and startup checks.

use std::io::Write;
use std::sync::Arc;

use bandscore_core::fakes::{ScriptedGenerator, ScriptedImageToText};
use bandscore_core::{
    Capability, ConfigError, Criterion, EngineConfig, EssayType, JsonRubricProvider, Orchestrator,
    RubricProvider,
};

fn builder(config: EngineConfig) -> bandscore_core::OrchestratorBuilder {
    Orchestrator::builder(config)
        .generator(Arc::new(ScriptedGenerator::new()))
        .image_to_text(Arc::new(ScriptedImageToText::failing()))
}

#[test]
fn test_config_file_round_trip_into_orchestrator() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
max_unhealthy_criteria = 2
submission_timeout_ms = 90000
criteria_timeout_ms = 60000
describe_timeout_ms = 10000
gap_timeout_ms = 15000

[retry]
max_attempts = 3

[audit]
enabled = true

[models.grammar]
model = "gemini-1.5-flash"
temperature = 0.0
"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.max_unhealthy_criteria, 2);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.initial_backoff_ms, 250);
    assert!(config.audit.enabled);
    assert_eq!(
        config.models.for_capability(Capability::Grammar).model,
        "gemini-1.5-flash"
    );

    let orch = builder(config).build().unwrap();
    assert_eq!(orch.config().submission_timeout_ms, 90_000);
    assert_eq!(orch.config().gap_timeout_ms, 15_000);
}

#[test]
fn test_phase_deadlines_exceeding_submission_budget_rejected_at_build() {
    let config = EngineConfig::from_toml_str(
        "submission_timeout_ms = 90000\ncriteria_timeout_ms = 60000",
    )
    .unwrap();
    let err = builder(config).build().err().unwrap();
    assert!(matches!(err, ConfigError::InvalidSetting { ref field, .. } if field == "submission_timeout_ms"));
}

#[test]
fn test_missing_config_file_is_read_error() {
    let err = EngineConfig::load(std::path::Path::new("/nonexistent/bandscore.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_overrides_take_precedence_over_file() {
    let mut config = EngineConfig::from_toml_str("max_unhealthy_criteria = 0").unwrap();
    config
        .apply_overrides(|key| match key {
            "BANDSCORE_MAX_UNHEALTHY" => Some("2".to_string()),
            "BANDSCORE_AUDIT" => Some("yes".to_string()),
            "LEXICAL_MODEL" => Some("gpt-4o".to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.max_unhealthy_criteria, 2);
    assert!(config.audit.enabled);
    assert_eq!(config.models.for_capability(Capability::Lexical).model, "gpt-4o");
}

#[test]
fn test_invalid_threshold_rejected_at_build() {
    let config = EngineConfig {
        max_unhealthy_criteria: 4,
        ..EngineConfig::default()
    };
    let err = builder(config).build().err().unwrap();
    assert!(matches!(err, ConfigError::InvalidSetting { ref field, .. } if field == "max_unhealthy_criteria"));
}

#[test]
fn test_missing_generator_rejected_at_build() {
    let err = Orchestrator::builder(EngineConfig::default())
        .image_to_text(Arc::new(ScriptedImageToText::failing()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::InvalidSetting { ref field, .. } if field == "generator"));
}

#[test]
fn test_incomplete_rubric_rejected_at_build() {
    let json = r#"{"exams": {"Academic": {"tasks": {}, "penalties": []}}}"#;
    let rubric = JsonRubricProvider::from_json_str(json).unwrap();
    let err = builder(EngineConfig::default())
        .rubric(Arc::new(rubric))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::MissingRubric { .. }));
}

#[test]
fn test_rubric_path_loaded_from_config() {
    let bundled = JsonRubricProvider::bundled().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serde_json::to_string(bundled.document()).unwrap().as_bytes())
        .unwrap();

    let config = EngineConfig {
        rubric_path: Some(file.path().to_path_buf()),
        ..EngineConfig::default()
    };
    assert!(builder(config).build().is_ok());

    let broken = EngineConfig {
        rubric_path: Some(std::path::PathBuf::from("/nonexistent/rubric.json")),
        ..EngineConfig::default()
    };
    assert!(builder(broken).build().is_err());
}

#[test]
fn test_bundled_rubric_uses_task_specific_names() {
    let rubric = JsonRubricProvider::bundled().unwrap();
    let t1 = rubric
        .describe_criterion(Criterion::TaskAchievement, EssayType::AcademicTask1)
        .unwrap();
    let t2 = rubric
        .describe_criterion(Criterion::TaskAchievement, EssayType::AcademicTask2)
        .unwrap();
    assert_eq!(t1.rubric_name, "Task Achievement");
    assert_eq!(t2.rubric_name, "Task Response");
    assert_eq!(t1.word_requirement, 150);
    assert_eq!(t2.word_requirement, 250);
}
