//! Text completion port and its resilient wrapper.
//!
//! [`TextCompletionPort`] is the only way the pipeline talks to an LLM. It
//! never errors: any failure (no provider, timeout, open circuit, retries
//! exhausted) comes back as `None` and the caller falls back to
//! deterministic scoring.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;

use crate::config::LlmSettings;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};
use crate::resilience::CircuitBreaker;

#[async_trait]
pub trait TextCompletionPort: Send + Sync {
    /// Complete `prompt`, or `None` if no usable answer could be had.
    ///
    /// `model_hint` is a model id or one of `"judge"`, `"fallback"`.
    async fn complete(
        &self,
        prompt: &str,
        model_hint: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Option<String>;
}

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Provider wrapped with a per-call timeout, bounded retries on transient
/// errors, a circuit breaker per model and one fallback model.
pub struct ResilientCompletion {
    provider: Arc<dyn LlmProvider>,
    settings: LlmSettings,
    breaker: CircuitBreaker,
    system_prompt: Option<String>,
    retry_delay: Duration,
}

impl ResilientCompletion {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: LlmSettings) -> Self {
        let breaker = CircuitBreaker::new(settings.circuit_breaker.clone());
        Self {
            provider,
            settings,
            breaker,
            system_prompt: None,
            retry_delay: Duration::from_millis(250),
        }
    }

    /// Prepend a system message to every request.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// First backoff delay; later ones grow exponentially.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn messages(&self, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));
        messages
    }

    async fn attempt(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let endpoint = format!("{}:{}", self.provider.name(), model);
        if self.breaker.is_open(&endpoint) {
            return Err(CompletionError::CircuitOpen(endpoint));
        }

        let config = CompletionConfig {
            model: model.to_string(),
            max_tokens,
            temperature,
            timeout: self.settings.timeout,
        };
        let messages = self.messages(prompt);
        let provider = self.provider.as_ref();
        let config_ref = &config;

        let call = || {
            let messages = messages.clone();
            async move {
                tokio::time::timeout(config_ref.timeout, provider.complete(messages, config_ref))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout(config_ref.timeout)))
            }
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_max_times(self.settings.max_retries);

        let result = call
            .retry(backoff)
            .when(ProviderError::is_transient)
            .notify(|e: &ProviderError, delay: Duration| {
                tracing::debug!(endpoint = %endpoint, error = %e, ?delay, "retrying completion");
            })
            .await;

        match result {
            Ok(response) => {
                self.breaker.record_success(&endpoint);
                tracing::debug!(
                    endpoint = %endpoint,
                    tokens = response.usage.total(),
                    "completion succeeded"
                );
                Ok(response.content)
            }
            Err(e) => {
                self.breaker.record_failure(&endpoint);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl TextCompletionPort for ResilientCompletion {
    async fn complete(
        &self,
        prompt: &str,
        model_hint: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Option<String> {
        let model = self.settings.resolve_model(model_hint);
        let err = match self.attempt(&model, prompt, temperature, max_tokens).await {
            Ok(text) => return Some(text),
            Err(e) => e,
        };
        tracing::warn!(model = %model, error = %err, "completion failed");

        let fallback = self
            .settings
            .fallback_model
            .as_deref()
            .filter(|fallback| *fallback != model)?;

        match self.attempt(fallback, prompt, temperature, max_tokens).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(model = %fallback, error = %e, "fallback completion failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for ResilientCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCompletion")
            .field("provider", &self.provider.name())
            .field("model", &self.settings.model)
            .finish()
    }
}
