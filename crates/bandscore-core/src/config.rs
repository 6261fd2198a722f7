//! Engine configuration.
//!
//! Loaded from a TOML file (every field optional) and then overridden from the
//! environment. The resulting [`EngineConfig`] is injected into the
//! orchestrator at construction time; nothing in the workflow reads the
//! environment directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delegate::Capability;
use crate::domain::ConfigError;

/// Bounded retry with exponential backoff for delegate calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Model name and sampling temperature for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
}

impl ModelSpec {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }
}

/// One model per capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTable {
    pub grammar: ModelSpec,
    pub lexical: ModelSpec,
    pub task: ModelSpec,
    pub coherence: ModelSpec,
    pub image: ModelSpec,
    pub audit: ModelSpec,
    pub gap: ModelSpec,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self {
            grammar: ModelSpec::new("gpt-4o-mini", 0.0),
            lexical: ModelSpec::new("gpt-4o-mini", 0.0),
            task: ModelSpec::new("gpt-4o-mini", 0.0),
            coherence: ModelSpec::new("gpt-4o-mini", 0.0),
            image: ModelSpec::new("gpt-4o-mini", 0.0),
            audit: ModelSpec::new("gpt-4o-mini", 0.0),
            gap: ModelSpec::new("gpt-4o-mini", 0.3),
        }
    }
}

impl ModelTable {
    pub fn for_capability(&self, capability: Capability) -> &ModelSpec {
        match capability {
            Capability::Grammar => &self.grammar,
            Capability::Lexical => &self.lexical,
            Capability::Task => &self.task,
            Capability::Coherence => &self.coherence,
            Capability::ImageDescription => &self.image,
            Capability::QualityAudit => &self.audit,
            Capability::GapAnalysis => &self.gap,
        }
    }

    fn for_capability_mut(&mut self, capability: Capability) -> &mut ModelSpec {
        match capability {
            Capability::Grammar => &mut self.grammar,
            Capability::Lexical => &mut self.lexical,
            Capability::Task => &mut self.task,
            Capability::Coherence => &mut self.coherence,
            Capability::ImageDescription => &mut self.image,
            Capability::QualityAudit => &mut self.audit,
            Capability::GapAnalysis => &mut self.gap,
        }
    }

    /// Capabilities the workflow may call, with their models.
    pub fn entries(&self) -> impl Iterator<Item = (Capability, &ModelSpec)> {
        Capability::ALL
            .into_iter()
            .map(move |c| (c, self.for_capability(c)))
    }
}

/// Environment variable that overrides the model of a capability.
pub fn model_env_var(capability: Capability) -> &'static str {
    match capability {
        Capability::Grammar => "GRAMMAR_MODEL",
        Capability::Lexical => "LEXICAL_MODEL",
        Capability::Task => "TASK_MODEL",
        Capability::Coherence => "COHERENCE_MODEL",
        Capability::ImageDescription => "IMAGE_MODEL",
        Capability::QualityAudit => "EVAL_MODEL",
        Capability::GapAnalysis => "OVERALL_MODEL",
    }
}

/// Quality-audit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// How long the response path waits for a running audit before attaching
    /// a pending verdict. `0` never waits: the verdict is `Pending` unless the
    /// audit already finished, and the report still reaches the sink.
    pub attach_timeout_ms: u64,
    /// Where full audit reports are written, if anywhere.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            attach_timeout_ms: 2_000,
            artifact_dir: None,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Highest count of degraded plus missing criteria that still yields a record.
    pub max_unhealthy_criteria: usize,
    pub retry: RetryPolicy,
    pub delegate_timeout_ms: u64,
    /// Deadline for the image describer, retries included.
    pub describe_timeout_ms: u64,
    pub criteria_timeout_ms: u64,
    /// Deadline for gap-analysis suggestions, retries included.
    pub gap_timeout_ms: u64,
    pub submission_timeout_ms: u64,
    pub audit: AuditConfig,
    pub models: ModelTable,
    pub rubric_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_unhealthy_criteria: 1,
            retry: RetryPolicy::default(),
            delegate_timeout_ms: 60_000,
            describe_timeout_ms: 30_000,
            criteria_timeout_ms: 120_000,
            gap_timeout_ms: 30_000,
            submission_timeout_ms: 240_000,
            audit: AuditConfig::default(),
            models: ModelTable::default(),
            rubric_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read a TOML config file. Does not apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("BANDSCORE_AUDIT") {
            self.audit.enabled = parse_flag(&raw);
        }
        if let Some(raw) = lookup("BANDSCORE_MAX_UNHEALTHY") {
            self.max_unhealthy_criteria = parse_number("BANDSCORE_MAX_UNHEALTHY", &raw)?;
        }
        if let Some(raw) = lookup("BANDSCORE_SUBMISSION_TIMEOUT_MS") {
            self.submission_timeout_ms = parse_number("BANDSCORE_SUBMISSION_TIMEOUT_MS", &raw)?;
        }
        for capability in Capability::ALL {
            if let Some(model) = lookup(model_env_var(capability)) {
                let model = model.trim();
                if !model.is_empty() {
                    self.models.for_capability_mut(capability).model = model.to_string();
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.multiplier < 1.0 || !self.retry.multiplier.is_finite() {
            return Err(invalid("retry.multiplier", "must be a finite value >= 1.0"));
        }
        for (field, value) in [
            ("delegate_timeout_ms", self.delegate_timeout_ms),
            ("describe_timeout_ms", self.describe_timeout_ms),
            ("criteria_timeout_ms", self.criteria_timeout_ms),
            ("gap_timeout_ms", self.gap_timeout_ms),
            ("submission_timeout_ms", self.submission_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.phase_budget_ms() > self.submission_timeout_ms {
            return Err(invalid(
                "submission_timeout_ms",
                &format!(
                    "must cover the describe, criteria and gap deadlines plus the audit wait ({} ms)",
                    self.phase_budget_ms()
                ),
            ));
        }
        if self.max_unhealthy_criteria >= 4 {
            return Err(invalid(
                "max_unhealthy_criteria",
                "must leave at least one criterion required",
            ));
        }
        for (capability, spec) in self.models.entries() {
            if spec.model.trim().is_empty() {
                return Err(invalid(
                    &format!("models.{}", capability.as_str()),
                    "model name must not be empty",
                ));
            }
        }
        Ok(())
    }

    pub fn delegate_timeout(&self) -> Duration {
        Duration::from_millis(self.delegate_timeout_ms)
    }

    /// Worst-case time the phase deadlines allow one submission to take.
    pub fn phase_budget_ms(&self) -> u64 {
        let attach = if self.audit.enabled {
            self.audit.attach_timeout_ms
        } else {
            0
        };
        self.describe_timeout_ms
            .saturating_add(self.criteria_timeout_ms)
            .saturating_add(self.gap_timeout_ms)
            .saturating_add(attach)
    }

    pub fn describe_timeout(&self) -> Duration {
        Duration::from_millis(self.describe_timeout_ms)
    }

    pub fn criteria_timeout(&self) -> Duration {
        Duration::from_millis(self.criteria_timeout_ms)
    }

    pub fn gap_timeout(&self) -> Duration {
        Duration::from_millis(self.gap_timeout_ms)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    pub fn audit_attach_timeout(&self) -> Duration {
        Duration::from_millis(self.audit.attach_timeout_ms)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(field, &format!("expected a non-negative integer, got {raw:?}")))
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_unhealthy_criteria, 1);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.audit.enabled);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(4_000));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_unhealthy_criteria = 0

            [audit]
            enabled = true

            [models.grammar]
            model = "gemini-1.5-flash"
            temperature = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.max_unhealthy_criteria, 0);
        assert!(config.audit.enabled);
        assert_eq!(config.audit.attach_timeout_ms, 2_000);
        assert_eq!(config.models.grammar.model, "gemini-1.5-flash");
        assert_eq!(config.models.lexical.model, "gpt-4o-mini");
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BANDSCORE_AUDIT", "Yes"),
            ("BANDSCORE_MAX_UNHEALTHY", "2"),
            ("EVAL_MODEL", "gemini-1.5-pro"),
            ("TASK_MODEL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert!(config.audit.enabled);
        assert_eq!(config.max_unhealthy_criteria, 2);
        assert_eq!(config.models.audit.model, "gemini-1.5-pro");
        assert_eq!(config.models.task.model, "gpt-4o-mini");
    }

    #[test]
    fn test_bad_numeric_override_is_config_error() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|k| (k == "BANDSCORE_MAX_UNHEALTHY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn test_phase_deadlines_must_fit_submission_budget() {
        let config = EngineConfig::default();
        assert_eq!(config.phase_budget_ms(), 180_000);
        assert!(config.phase_budget_ms() <= config.submission_timeout_ms);

        let mut config = EngineConfig::default();
        config.describe_timeout_ms = 100_000;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting { ref field, .. } if field == "submission_timeout_ms"
        ));

        let mut config = EngineConfig::default();
        config.submission_timeout_ms = 181_000;
        assert!(config.validate().is_ok());
        config.audit.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_timeouts() {
        let mut config = EngineConfig::default();
        config.criteria_timeout_ms = config.submission_timeout_ms + 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.gap_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.delegate_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
