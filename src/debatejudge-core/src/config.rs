//! Configuration module for loading TOML config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::capability::{CapabilityDescriptor, CapabilityPolicy, Parameter};
use crate::character::{CharacterConfig, default_characters};
use crate::error::DebateError;
use crate::provider::{DEEPSEEK_API_BASE, DEFAULT_OLLAMA_URL, OPENAI_API_BASE, SILICONFLOW_API_BASE};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default = "default_characters")]
    pub characters: Vec<CharacterConfig>,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// Defaults applied to every new session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_total_rounds")]
    pub total_rounds: u32,
    #[serde(default)]
    pub capability_policy: CapabilityPolicy,
}

fn default_total_rounds() -> u32 {
    3
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            total_rounds: default_total_rounds(),
            capability_policy: CapabilityPolicy::default(),
        }
    }
}

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    OpenaiCompatible,
}

/// How to reach one provider and what it supports.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Provider-wide capabilities; built-in defaults when absent.
    #[serde(default)]
    pub capabilities: Option<CapabilityDescriptor>,
    /// Per-model overrides, keyed by model id.
    #[serde(default)]
    pub models: BTreeMap<String, CapabilityDescriptor>,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: None,
            api_key_env: None,
            capabilities: None,
            models: BTreeMap::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    /// Capabilities for `model` served by the provider registered as `name`.
    pub fn descriptor_for(&self, name: &str, model: &str) -> CapabilityDescriptor {
        self.models
            .get(model)
            .or(self.capabilities.as_ref())
            .cloned()
            .unwrap_or_else(|| default_capabilities(name, self.kind))
    }

    pub fn base_url_or_default(&self, name: &str) -> String {
        if let Some(url) = &self.base_url {
            return url.clone();
        }
        match (self.kind, name) {
            (ProviderKind::Ollama, _) => DEFAULT_OLLAMA_URL.to_string(),
            (_, "deepseek") => DEEPSEEK_API_BASE.to_string(),
            (_, "siliconflow") => SILICONFLOW_API_BASE.to_string(),
            _ => OPENAI_API_BASE.to_string(),
        }
    }
}

/// Built-in capability tables for the providers we ship.
pub fn default_capabilities(name: &str, kind: ProviderKind) -> CapabilityDescriptor {
    use Parameter::*;

    match (kind, name) {
        (ProviderKind::Ollama, _) => CapabilityDescriptor::new(8_192, 4_096)
            .with_parameters([Temperature, TopP, MaxTokens, PresencePenalty, FrequencyPenalty, Stop])
            .with_streaming(true),
        (_, "openai") => CapabilityDescriptor::new(128_000, 16_384)
            .with_parameters([Temperature, TopP, MaxTokens, PresencePenalty, FrequencyPenalty, Stop])
            .with_streaming(true)
            .with_function_calling(true),
        (_, "deepseek") => CapabilityDescriptor::new(64_000, 8_192)
            .with_parameters([Temperature, TopP, MaxTokens, PresencePenalty, FrequencyPenalty, Stop])
            .with_streaming(true)
            .with_function_calling(true),
        (_, "siliconflow") => CapabilityDescriptor::new(32_768, 4_096)
            .with_parameters([Temperature, TopP, MaxTokens, FrequencyPenalty, Stop])
            .with_streaming(true)
            .with_function_calling(true),
        _ => CapabilityDescriptor::new(8_192, 4_096).with_parameters([Temperature, TopP, MaxTokens]),
    }
}

/// Providers registered when the configuration names none.
pub fn default_providers() -> BTreeMap<String, ProviderSettings> {
    BTreeMap::from([
        ("ollama".to_string(), ProviderSettings::new(ProviderKind::Ollama)),
        (
            "openai".to_string(),
            ProviderSettings::new(ProviderKind::OpenaiCompatible).with_api_key_env("OPENAI_API_KEY"),
        ),
        (
            "deepseek".to_string(),
            ProviderSettings::new(ProviderKind::OpenaiCompatible)
                .with_api_key_env("DEEPSEEK_API_KEY"),
        ),
        (
            "siliconflow".to_string(),
            ProviderSettings::new(ProviderKind::OpenaiCompatible)
                .with_api_key_env("SILICONFLOW_API_KEY"),
        ),
    ])
}

/// Prompt templates used to drive each turn.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptsConfig {
    /// Placeholders: `{round}`, `{total_rounds}`, `{transcript}`.
    #[serde(default = "default_debater_turn")]
    pub debater_turn: String,
    /// Placeholders: `{topic}`, `{round}`, `{debaters}`, `{rubric}`, `{transcript}`.
    #[serde(default = "default_judge_scoring")]
    pub judge_scoring: String,
    /// Placeholders: `{round}`, `{total_rounds}`, `{debaters}`, `{transcript}`.
    #[serde(default = "default_moderator_intro")]
    pub moderator_intro: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            debater_turn: default_debater_turn(),
            judge_scoring: default_judge_scoring(),
            moderator_intro: default_moderator_intro(),
        }
    }
}

fn default_debater_turn() -> String {
    "[Round {round} of {total_rounds}]\n\nDebate so far:\n{transcript}\n\nPlease deliver your statement for this round.".to_string()
}

fn default_judge_scoring() -> String {
    r#"Debate topic: {topic}
Debaters: {debaters}

Transcript of round {round}:
{transcript}

Score every debater on each rubric dimension:
{rubric}

Answer with JSON only, in exactly this shape:
{"scores": {"<debater name>": {"<dimension>": <number>}}, "winner": "<debater name>", "reasoning": "<one paragraph>"}"#
        .to_string()
}

fn default_moderator_intro() -> String {
    "Round {round} of {total_rounds} is about to begin between {debaters}.\n\nDebate so far:\n{transcript}\n\nIntroduce this round.".to_string()
}

/// Replace `{key}` placeholders in `template`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DebateError> {
        if self.session.total_rounds == 0 {
            return Err(DebateError::InvalidConfig(
                "session.total_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        session: SessionConfig::default(),
        providers: default_providers(),
        characters: default_characters(),
        prompts: PromptsConfig::default(),
    }
}
