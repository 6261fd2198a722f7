//! Chat-completions client implementing the text and image delegates.

use std::time::Duration;

use async_trait::async_trait;
use bandscore_core::{
    Completion, ConfigError, DelegateError, DelegateResult, GenerationRequest, ImageToText,
    TextGenerator, TokenUsage,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::provider::{Credentials, Provider};

/// Connection settings for [`ChatCompletionsClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub openai_base_url: String,
    pub gemini_base_url: String,
    pub user_agent: String,
    /// Transport-level cap; the engine applies its own per-call timeout on top.
    pub request_timeout: Duration,
    /// Timeout for the `HEAD` probe of an image reference.
    pub probe_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            openai_base_url: Provider::OpenAi.default_base_url().to_string(),
            gemini_base_url: Provider::Gemini.default_base_url().to_string(),
            user_agent: format!("bandscore/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpClientConfig {
    pub fn with_base_url(mut self, provider: Provider, url: impl Into<String>) -> Self {
        match provider {
            Provider::OpenAi => self.openai_base_url = url.into(),
            Provider::Gemini => self.gemini_base_url = url.into(),
        }
        self
    }

    fn base_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai_base_url,
            Provider::Gemini => &self.gemini_base_url,
        }
    }
}

/// One client for every capability; the model name picks the provider.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    config: HttpClientConfig,
    credentials: Credentials,
}

impl ChatCompletionsClient {
    pub fn new(config: HttpClientConfig, credentials: Credentials) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidSetting {
                field: "http_client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    fn endpoint(&self, provider: Provider) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url(provider).trim_end_matches('/')
        )
    }

    async fn complete(
        &self,
        request: &GenerationRequest,
        image_url: Option<&str>,
    ) -> DelegateResult<Completion> {
        let (provider, key) = self
            .credentials
            .key_for_model(&request.model.model)
            .map_err(|e| DelegateError::Rejected(e.to_string()))?;
        let url = self.endpoint(provider);
        debug!(
            capability = %request.capability,
            provider = %provider,
            model = %request.model.model,
            "chat completion request"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(&request_body(request, image_url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), provider = %provider, "chat completion failed");
            return Err(status_error(status, &body));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| DelegateError::Malformed(format!("response is not JSON: {e}")))?;
        parse_completion(&value)
    }

    /// Reject references that do not serve an image. Not retried.
    async fn probe_image(&self, image_url: &str) -> DelegateResult<()> {
        let response = self
            .http
            .head(image_url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DelegateError::Rejected(format!(
                "image reference returned HTTP {}",
                status.as_u16()
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(DelegateError::Rejected(format!(
                "image reference is not an image (content-type {content_type:?})"
            )));
        }
        Ok(())
    }

    fn transport_error(&self, error: reqwest::Error) -> DelegateError {
        if error.is_timeout() {
            DelegateError::Timeout {
                after_ms: self.config.request_timeout.as_millis() as u64,
            }
        } else if error.is_builder() {
            DelegateError::Rejected(error.to_string())
        } else {
            DelegateError::Unavailable(error.to_string())
        }
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    /// Attaches `request.image_reference` only when it serves an image;
    /// otherwise the prompt goes out as text.
    async fn generate(&self, request: &GenerationRequest) -> DelegateResult<Completion> {
        let image = match request.image_reference.as_deref() {
            Some(url) => match self.probe_image(url).await {
                Ok(()) => Some(url),
                Err(e) => {
                    debug!(error = %e, "image reference not attached");
                    None
                }
            },
            None => None,
        };
        self.complete(request, image).await
    }
}

#[async_trait]
impl ImageToText for ChatCompletionsClient {
    async fn describe_image(
        &self,
        image_reference: &str,
        request: &GenerationRequest,
    ) -> DelegateResult<Completion> {
        self.probe_image(image_reference).await?;
        self.complete(request, Some(image_reference)).await
    }
}

fn request_body(request: &GenerationRequest, image_url: Option<&str>) -> Value {
    let content = match image_url {
        Some(url) => json!([
            { "type": "text", "text": request.prompt },
            { "type": "image_url", "image_url": { "url": url } },
        ]),
        None => Value::String(request.prompt.clone()),
    };
    let mut body = json!({
        "model": request.model.model,
        "temperature": request.model.temperature,
        "messages": [{ "role": "user", "content": content }],
    });
    if request.expect_json {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn status_error(status: StatusCode, body: &str) -> DelegateError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DelegateError::Unavailable(detail)
    } else {
        DelegateError::Rejected(detail)
    }
}

fn parse_completion(value: &Value) -> DelegateResult<Completion> {
    let text = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| DelegateError::Malformed("response missing message content".to_string()))?;

    let usage = value.get("usage").map(|u| {
        let field = |name: &str| u.get(name).and_then(Value::as_u64).unwrap_or(0);
        TokenUsage {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
        }
    });

    Ok(Completion {
        text: text.to_string(),
        usage,
        model: value.get("model").and_then(Value::as_str).map(str::to_string),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
