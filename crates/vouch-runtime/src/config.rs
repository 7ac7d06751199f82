//! Pipeline configuration.
//!
//! Built once at startup, from environment variables or a YAML file, and
//! passed down explicitly. Unknown or malformed values fail fast with a
//! [`ConfigError`]; a missing LLM key only disables the LLM path.
//!
//! | Variable | Default |
//! |---|---|
//! | `AGENT_ENABLED` | `true` |
//! | `AGENT_DRY_RUN` | `true` |
//! | `ALLOW_APPROVE_IN_DRY_RUN` | `false` |
//! | `JUDGE_ENABLED` | `true` |
//! | `JUDGE_MODE` | `heuristic` (`llm` when `JUDGE_USE_LLM=true`) |
//! | `CATALOG_CACHE_TTL` | `5m` |
//! | `OPENROUTER_MODEL` | `openai/gpt-4o-mini` |
//! | `OPENROUTER_JUDGE_MODEL` | `openai/gpt-4o` |
//! | `OPENROUTER_FALLBACK_MODEL` | `anthropic/claude-3-haiku` |
//! | `LLM_TIMEOUT` | `10s` |
//! | `LLM_MAX_RETRIES` | `2` |
//! | `LLM_CIRCUIT_FAILURES` | `3` |
//! | `LLM_CIRCUIT_RECOVERY` | `30s` |

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::CircuitBreakerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key}: expected true/false/1/0/yes/no, got '{value}'")]
    InvalidBool { key: String, value: String },

    #[error("{key}: invalid duration '{value}': {reason}")]
    InvalidDuration {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{key}: expected a non-negative integer, got '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("{key}: expected heuristic, llm or blended, got '{value}'")]
    InvalidJudgeMode { key: String, value: String },

    #[error("{0}")]
    Invalid(String),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// How explanation quality is scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeMode {
    #[default]
    Heuristic,
    Llm,
    /// Mean of heuristic and LLM scores when the LLM answers.
    Blended,
}

impl JudgeMode {
    pub fn uses_llm(&self) -> bool {
        !matches!(self, JudgeMode::Heuristic)
    }
}

impl FromStr for JudgeMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(JudgeMode::Heuristic),
            "llm" => Ok(JudgeMode::Llm),
            "blended" => Ok(JudgeMode::Blended),
            _ => Err(()),
        }
    }
}

impl fmt::Display for JudgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JudgeMode::Heuristic => "heuristic",
            JudgeMode::Llm => "llm",
            JudgeMode::Blended => "blended",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub mode: JudgeMode,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: JudgeMode::Heuristic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Registry key of the provider to build.
    pub provider: String,

    /// Model for untagged requests.
    pub model: String,

    /// Model for the `"judge"` hint.
    pub judge_model: String,

    /// Tried once after the requested model has exhausted its retries.
    pub fallback_model: Option<String>,

    #[serde(with = "duration_human")]
    pub timeout: Duration,

    pub max_retries: usize,

    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            judge_model: "openai/gpt-4o".to_string(),
            fallback_model: Some("anthropic/claude-3-haiku".to_string()),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl LlmSettings {
    /// Resolve a model hint (`"judge"`, `"fallback"`, a model id, or none).
    pub fn resolve_model(&self, hint: Option<&str>) -> String {
        match hint {
            None | Some("") | Some("default") => self.model.clone(),
            Some("judge") => self.judge_model.clone(),
            Some("fallback") => self
                .fallback_model
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            Some(model) => model.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// When false every item short-circuits to `AGENT_DISABLED`.
    pub agent_enabled: bool,

    /// Proposals are logged, not persisted.
    pub dry_run: bool,

    pub allow_approve_in_dry_run: bool,

    pub judge: JudgeConfig,

    #[serde(with = "duration_human")]
    pub cache_ttl: Duration,

    pub llm: LlmSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agent_enabled: true,
            dry_run: true,
            allow_approve_in_dry_run: false,
            judge: JudgeConfig::default(),
            cache_ttl: Duration::from_secs(300),
            llm: LlmSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = Self::default();

        let use_llm = env.bool("JUDGE_USE_LLM", false)?;
        let mode = match env.get("JUDGE_MODE") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidJudgeMode {
                key: "JUDGE_MODE".to_string(),
                value,
            })?,
            None if use_llm => JudgeMode::Llm,
            None => JudgeMode::Heuristic,
        };

        let llm_defaults = defaults.llm;
        let config = Self {
            agent_enabled: env.bool("AGENT_ENABLED", defaults.agent_enabled)?,
            dry_run: env.bool("AGENT_DRY_RUN", defaults.dry_run)?,
            allow_approve_in_dry_run: env
                .bool("ALLOW_APPROVE_IN_DRY_RUN", defaults.allow_approve_in_dry_run)?,
            judge: JudgeConfig {
                enabled: env.bool("JUDGE_ENABLED", defaults.judge.enabled)?,
                mode,
            },
            cache_ttl: env.duration("CATALOG_CACHE_TTL", defaults.cache_ttl)?,
            llm: LlmSettings {
                provider: env.get("LLM_PROVIDER").unwrap_or(llm_defaults.provider),
                model: env.get("OPENROUTER_MODEL").unwrap_or(llm_defaults.model),
                judge_model: env
                    .get("OPENROUTER_JUDGE_MODEL")
                    .unwrap_or(llm_defaults.judge_model),
                fallback_model: env
                    .get("OPENROUTER_FALLBACK_MODEL")
                    .or(llm_defaults.fallback_model),
                timeout: env.duration("LLM_TIMEOUT", llm_defaults.timeout)?,
                max_retries: env.number("LLM_MAX_RETRIES", llm_defaults.max_retries)?,
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: env.number(
                        "LLM_CIRCUIT_FAILURES",
                        llm_defaults.circuit_breaker.failure_threshold,
                    )?,
                    recovery_timeout: env.duration(
                        "LLM_CIRCUIT_RECOVERY",
                        llm_defaults.circuit_breaker.recovery_timeout,
                    )?,
                    success_threshold: llm_defaults.circuit_breaker.success_threshold,
                },
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.timeout.is_zero() {
            return Err(ConfigError::Invalid("llm.timeout must be positive".to_string()));
        }
        if self.llm.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "llm.circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether approved proposals may be applied right now.
    pub fn may_apply(&self) -> bool {
        !self.dry_run || self.allow_approve_in_dry_run
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn duration(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            Some(value) => humantime::parse_duration(&value).map_err(|e| {
                ConfigError::InvalidDuration {
                    key: key.to_string(),
                    value,
                    reason: e.to_string(),
                }
            }),
            None => Ok(default),
        }
    }

    fn number<N: FromStr>(&self, key: &str, default: N) -> Result<N, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
                key: key.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }
}

mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
