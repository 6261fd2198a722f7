//! Provider routing by model name, and API credentials.

use std::fmt;

use bandscore_core::{ConfigError, ModelTable};

pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
pub const GEMINI_KEY_VAR: &str = "GEMINI_API_KEY";

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Hosted model family. Both speak the chat-completions wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    /// Route a model name: `gpt-*` to OpenAI, `gemini-*` to Gemini.
    pub fn from_model(model: &str) -> Result<Self, ConfigError> {
        let name = model.trim().to_ascii_lowercase();
        if name.starts_with("gpt-") {
            Ok(Provider::OpenAi)
        } else if name.starts_with("gemini-") {
            Ok(Provider::Gemini)
        } else {
            Err(ConfigError::UnsupportedModel {
                model: model.to_string(),
            })
        }
    }

    pub fn key_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_KEY_VAR,
            Provider::Gemini => GEMINI_KEY_VAR,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_BASE_URL,
            Provider::Gemini => GEMINI_BASE_URL,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => f.write_str("openai"),
            Provider::Gemini => f.write_str("gemini"),
        }
    }
}

/// API keys for the supported providers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    openai: Option<String>,
    gemini: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openai", &self.openai.as_ref().map(|_| "<redacted>"))
            .field("gemini", &self.gemini.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(openai: Option<String>, gemini: Option<String>) -> Self {
        let keep = |key: Option<String>| key.filter(|k| !k.trim().is_empty());
        Self {
            openai: keep(openai),
            gemini: keep(gemini),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::new(lookup(OPENAI_KEY_VAR), lookup(GEMINI_KEY_VAR))
    }

    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai.as_deref(),
            Provider::Gemini => self.gemini.as_deref(),
        }
    }

    /// Key for the provider serving `model`.
    pub fn key_for_model(&self, model: &str) -> Result<(Provider, &str), ConfigError> {
        let provider = Provider::from_model(model)?;
        let key = self
            .get(provider)
            .ok_or_else(|| ConfigError::MissingCredential {
                variable: provider.key_var().to_string(),
                model: model.to_string(),
            })?;
        Ok((provider, key))
    }
}

/// Fail unless every configured model routes to a provider with a key.
pub fn check_models(models: &ModelTable, credentials: &Credentials) -> Result<(), ConfigError> {
    for (_, spec) in models.entries() {
        credentials.key_for_model(&spec.model)?;
    }
    Ok(())
}
