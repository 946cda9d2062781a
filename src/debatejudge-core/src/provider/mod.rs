//! The provider contract shared by every model backend.
//!
//! A provider client turns a [`Prompt`] plus a [`ModelConfig`] into a
//! normalized [`ProviderResponse`]. Callers only ever talk to
//! `dyn ProviderClient`; concrete backends are reached through the
//! [`ProviderRegistry`](crate::registry::ProviderRegistry).

mod ollama;
mod openai_compat;
mod sanitize;

pub use ollama::{DEFAULT_OLLAMA_URL, OllamaClient};
pub use openai_compat::{
    DEEPSEEK_API_BASE, OPENAI_API_BASE, OpenAICompatClient, SILICONFLOW_API_BASE,
};
pub use sanitize::sanitize_response;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityDescriptor, Parameter};
use crate::error::DebateError;

/// Which backend to call and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registry key of the provider (case-insensitive).
    pub provider: String,
    /// Model identifier understood by the provider (e.g. "llama3:8b").
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Number of completions to request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u8>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            stop: Vec::new(),
            n: None,
        }
    }

    /// Parse a `provider:model` pair such as `ollama:llama3:8b`.
    ///
    /// Only the first colon separates the provider, so model tags survive.
    pub fn parse(target: &str) -> Result<Self, DebateError> {
        match target.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(DebateError::InvalidConfig(format!(
                "expected <provider>:<model>, got '{}'",
                target
            ))),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn with_frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_completions(mut self, n: u8) -> Self {
        self.n = Some(n);
        self
    }

    /// Parameters this config actually sets.
    pub fn requested_parameters(&self) -> Vec<Parameter> {
        Parameter::ALL
            .into_iter()
            .filter(|p| match p {
                Parameter::Temperature => self.temperature.is_some(),
                Parameter::TopP => self.top_p.is_some(),
                Parameter::MaxTokens => self.max_tokens.is_some(),
                Parameter::PresencePenalty => self.presence_penalty.is_some(),
                Parameter::FrequencyPenalty => self.frequency_penalty.is_some(),
                Parameter::Stop => !self.stop.is_empty(),
                Parameter::MultiCompletion => self.n.is_some_and(|n| n > 1),
            })
            .collect()
    }

    /// Unset a parameter.
    pub fn clear(&mut self, parameter: Parameter) {
        match parameter {
            Parameter::Temperature => self.temperature = None,
            Parameter::TopP => self.top_p = None,
            Parameter::MaxTokens => self.max_tokens = None,
            Parameter::PresencePenalty => self.presence_penalty = None,
            Parameter::FrequencyPenalty => self.frequency_penalty = None,
            Parameter::Stop => self.stop.clear(),
            Parameter::MultiCompletion => self.n = None,
        }
    }

    /// Layer `overrides` on top of `self`: any parameter set there wins.
    pub fn merged_with(&self, overrides: &ModelConfig) -> ModelConfig {
        ModelConfig {
            provider: overrides.provider.clone(),
            model: overrides.model.clone(),
            temperature: overrides.temperature.or(self.temperature),
            top_p: overrides.top_p.or(self.top_p),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            stop: if overrides.stop.is_empty() {
                self.stop.clone()
            } else {
                overrides.stop.clone()
            },
            n: overrides.n.or(self.n),
        }
    }
}

/// What gets sent to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
}

impl Prompt {
    pub fn new(system: Option<String>, user: impl Into<String>) -> Self {
        Self {
            system,
            user: user.into(),
        }
    }

    /// Everything that counts against the context window.
    pub fn full_text(&self) -> String {
        match &self.system {
            Some(system) => format!("{}\n{}", system, self.user),
            None => self.user.clone(),
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Normalized response from any provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    pub created_at: DateTime<Utc>,
}

/// Common contract for model backends.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Registry key this client was built for.
    fn name(&self) -> &str;

    /// What the configured model honors.
    fn capabilities(&self) -> &CapabilityDescriptor;

    /// Generate a completion. `config` has already been capability-gated.
    async fn complete(
        &self,
        prompt: &Prompt,
        config: &ModelConfig,
    ) -> Result<ProviderResponse, DebateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_model_tag() {
        let config = ModelConfig::parse("ollama:llama3:8b").unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.model, "llama3:8b");
    }

    #[test]
    fn test_parse_rejects_missing_model() {
        assert!(matches!(
            ModelConfig::parse("ollama"),
            Err(DebateError::InvalidConfig(_))
        ));
        assert!(ModelConfig::parse(":llama3").is_err());
    }

    #[test]
    fn test_requested_parameters_ignores_single_completion() {
        let config = ModelConfig::new("openai", "gpt-4o")
            .with_temperature(0.5)
            .with_completions(1);
        assert_eq!(config.requested_parameters(), vec![Parameter::Temperature]);

        let config = config.with_completions(3);
        assert_eq!(
            config.requested_parameters(),
            vec![Parameter::Temperature, Parameter::MultiCompletion]
        );
    }

    #[test]
    fn test_merged_with_prefers_overrides() {
        let defaults = ModelConfig::new("deepseek", "deepseek-chat")
            .with_temperature(0.3)
            .with_max_tokens(400);
        let overrides = ModelConfig::new("ollama", "qwen2").with_temperature(0.9);
        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.provider, "ollama");
        assert_eq!(merged.model, "qwen2");
        assert_eq!(merged.temperature, Some(0.9));
        assert_eq!(merged.max_tokens, Some(400));
    }

    #[test]
    fn test_usage_totals() {
        let usage = Usage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }
}
