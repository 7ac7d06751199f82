//! OpenRouter provider (OpenAI-compatible chat completions).

use super::{
    factory::ProviderFactory,
    secrets::{ApiKey, OPENROUTER_KEY},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterProvider {
    key: ApiKey,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("key", &self.key)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_key(ApiKey::inline(api_key))
    }

    fn with_key(key: ApiKey) -> Self {
        Self {
            key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Reads `OPENROUTER_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self::with_key(ApiKey::resolve(&JsonValue::Null, OPENROUTER_KEY)?))
    }

    /// `api_key` and `base_url` from config, key falling back to the env.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let provider = Self::with_key(ApiKey::resolve(config, OPENROUTER_KEY)?);
        Ok(match config["base_url"].as_str() {
            Some(url) => provider.with_base_url(url),
            None => provider,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn into_completion(body: ChatResponse, requested_model: &str) -> Result<CompletionResponse, ProviderError> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

    Ok(CompletionResponse {
        content: choice.message.content.unwrap_or_default(),
        usage: body
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default(),
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        finish_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        // Only place the key is exposed.
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.key.expose())
            .header("HTTP-Referer", "https://github.com/vouch-rs/vouch")
            .header("X-Title", "vouch")
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error.message,
                Err(e) => e.to_string(),
            };
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        into_completion(body, &config.model)
    }

    async fn health_check(&self) -> bool {
        !self.key.is_blank()
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

/// ```json
/// { "api_key": "sk-or-...", "base_url": "https://..." }
/// ```
/// Both fields are optional; the key falls back to `OPENROUTER_API_KEY`.
pub struct OpenRouterProviderFactory;

impl ProviderFactory for OpenRouterProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openrouter"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(OpenRouterProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiKey::is_configured(config, OPENROUTER_KEY) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenRouter API key required: set '{}' in config or {}",
                OPENROUTER_KEY.config_field, OPENROUTER_KEY.env_var
            )));
        }
        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "OpenRouter chat completions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::secrets::KeyOrigin;

    #[test]
    fn test_debug_hides_key() {
        let secret = "sk-or-v1-abcdef";
        let provider = OpenRouterProvider::new(secret);
        let debug = format!("{:?}", provider);
        assert!(!debug.contains(secret));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_config() {
        let config = serde_json::json!({
            "api_key": "k",
            "base_url": "http://localhost:8080/v1/"
        });
        let provider = OpenRouterProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.key.origin(), KeyOrigin::ProviderConfig);
    }

    #[test]
    fn test_factory_rejects_bad_url() {
        let config = serde_json::json!({"api_key": "k", "base_url": "localhost"});
        assert!(OpenRouterProviderFactory.validate_config(&config).is_err());
    }

    #[test]
    fn test_response_mapping() {
        let body: ChatResponse = serde_json::from_str(
            r#"{
                "choices": [{"message": {"role": "assistant", "content": "0.85"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 90, "completion_tokens": 2}
            }"#,
        )
        .unwrap();
        let completion = into_completion(body, "openai/gpt-4o-mini").unwrap();
        assert_eq!(completion.content, "0.85");
        assert_eq!(completion.model, "openai/gpt-4o-mini");
        assert_eq!(completion.usage.total(), 92);
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let body: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            into_completion(body, "m"),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_needs_key() {
        assert!(OpenRouterProvider::new("k").health_check().await);
        assert!(!OpenRouterProvider::new("").health_check().await);
    }
}
