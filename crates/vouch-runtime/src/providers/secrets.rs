//! API keys for the explanation judge's LLM.
//!
//! A key is looked up once when the provider is built: first in the
//! provider config map, then in the environment. It lives in a
//! [`SecretString`] from then on and is only read back when the request
//! header is written. A missing key is not fatal to the pipeline; the CLI
//! turns it into heuristic-only judging.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;

use super::ProviderError;

/// Where to find a provider's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLookup {
    /// Field in the provider config map.
    pub config_field: &'static str,
    pub env_var: &'static str,
}

/// The OpenRouter key: `api_key` in config, else `OPENROUTER_API_KEY`.
pub const OPENROUTER_KEY: KeyLookup = KeyLookup {
    config_field: "api_key",
    env_var: "OPENROUTER_API_KEY",
};

impl KeyLookup {
    fn config_value<'a>(&self, config: &'a JsonValue) -> Option<&'a str> {
        config[self.config_field].as_str().filter(|v| !v.trim().is_empty())
    }

    fn missing(&self) -> ProviderError {
        ProviderError::NotConfigured(format!(
            "no API key: set '{}' in the provider config or the {} environment variable",
            self.config_field, self.env_var
        ))
    }
}

/// How a key was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    ProviderConfig,
    Environment,
    Inline,
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyOrigin::ProviderConfig => "provider config",
            KeyOrigin::Environment => "environment",
            KeyOrigin::Inline => "inline",
        })
    }
}

/// A provider API key. `Debug` and `Display` never show it.
pub struct ApiKey {
    secret: SecretString,
    origin: KeyOrigin,
}

impl ApiKey {
    /// Key handed over directly, e.g. by tests or an embedding service.
    pub fn inline(key: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(key.into()),
            origin: KeyOrigin::Inline,
        }
    }

    /// Config field first, then the process environment.
    pub fn resolve(config: &JsonValue, lookup: KeyLookup) -> Result<Self, ProviderError> {
        Self::resolve_with(config, lookup, |var| std::env::var(var).ok())
    }

    pub(crate) fn resolve_with<F>(config: &JsonValue, lookup: KeyLookup, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup.config_value(config) {
            return Ok(Self {
                secret: SecretString::from(key.to_string()),
                origin: KeyOrigin::ProviderConfig,
            });
        }
        match env(lookup.env_var).filter(|v| !v.trim().is_empty()) {
            Some(key) => Ok(Self {
                secret: SecretString::from(key),
                origin: KeyOrigin::Environment,
            }),
            None => Err(lookup.missing()),
        }
    }

    /// Whether [`ApiKey::resolve`] would find a key, without reading it.
    pub fn is_configured(config: &JsonValue, lookup: KeyLookup) -> bool {
        lookup.config_value(config).is_some()
            || std::env::var(lookup.env_var).is_ok_and(|v| !v.trim().is_empty())
    }

    /// Header value. Call it where the request is built and nowhere else.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_blank(&self) -> bool {
        self.secret.expose_secret().trim().is_empty()
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("origin", &self.origin)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED] ({})", self.origin)
    }
}
