//! Capability descriptors and capability-gated request validation.
//!
//! Every provider client advertises a [`CapabilityDescriptor`]. Before a
//! request leaves the process, [`CapabilityDescriptor::gate`] checks the
//! requested [`ModelConfig`] against it so that unsupported parameters and
//! oversized requests are caught locally instead of being silently ignored
//! upstream.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

use crate::error::DebateError;
use crate::provider::ModelConfig;

/// Optional request parameter a provider may or may not honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Temperature,
    TopP,
    MaxTokens,
    PresencePenalty,
    FrequencyPenalty,
    Stop,
    /// More than one completion per request.
    MultiCompletion,
}

impl Parameter {
    pub const ALL: [Parameter; 7] = [
        Parameter::Temperature,
        Parameter::TopP,
        Parameter::MaxTokens,
        Parameter::PresencePenalty,
        Parameter::FrequencyPenalty,
        Parameter::Stop,
        Parameter::MultiCompletion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Temperature => "temperature",
            Parameter::TopP => "top_p",
            Parameter::MaxTokens => "max_tokens",
            Parameter::PresencePenalty => "presence_penalty",
            Parameter::FrequencyPenalty => "frequency_penalty",
            Parameter::Stop => "stop",
            Parameter::MultiCompletion => "n",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do with a parameter the provider does not honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityPolicy {
    /// Fail the call with [`DebateError::UnsupportedCapability`].
    #[default]
    Reject,
    /// Strip the parameter and log a warning.
    Drop,
}

/// Static description of what a provider/model supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    #[serde(default)]
    pub supported_parameters: BTreeSet<Parameter>,
    /// Prompt plus response budget.
    pub max_context_tokens: u64,
    pub max_response_tokens: u64,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub supports_function_calling: bool,
}

impl CapabilityDescriptor {
    pub fn new(max_context_tokens: u64, max_response_tokens: u64) -> Self {
        Self {
            supported_parameters: BTreeSet::new(),
            max_context_tokens,
            max_response_tokens,
            supports_streaming: false,
            supports_function_calling: false,
        }
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Parameter>) -> Self {
        self.supported_parameters.extend(parameters);
        self
    }

    pub fn with_streaming(mut self, supported: bool) -> Self {
        self.supports_streaming = supported;
        self
    }

    pub fn with_function_calling(mut self, supported: bool) -> Self {
        self.supports_function_calling = supported;
        self
    }

    pub fn supports(&self, parameter: Parameter) -> bool {
        self.supported_parameters.contains(&parameter)
    }

    pub fn supports_multi_completion(&self) -> bool {
        self.supports(Parameter::MultiCompletion)
    }

    /// Validate `config` for a request carrying `prompt`.
    ///
    /// Returns the config that may be forwarded upstream. Under
    /// [`CapabilityPolicy::Drop`] unsupported parameters are cleared in the
    /// returned copy; the caller's config is never modified.
    pub fn gate(
        &self,
        provider: &str,
        config: &ModelConfig,
        prompt: &str,
        policy: CapabilityPolicy,
    ) -> Result<ModelConfig, DebateError> {
        let mut forwarded = config.clone();

        for parameter in config.requested_parameters() {
            if self.supports(parameter) {
                continue;
            }
            match policy {
                CapabilityPolicy::Reject => {
                    return Err(DebateError::UnsupportedCapability {
                        provider: provider.to_string(),
                        parameter: parameter.to_string(),
                    });
                }
                CapabilityPolicy::Drop => {
                    warn!(provider, %parameter, model = %config.model, "dropping unsupported parameter");
                    forwarded.clear(parameter);
                }
            }
        }

        let response_tokens = forwarded.max_tokens.map(u64::from).unwrap_or(0);
        if response_tokens > self.max_response_tokens {
            return Err(DebateError::ContextTooLarge {
                provider: provider.to_string(),
                requested: response_tokens,
                limit: self.max_response_tokens,
            });
        }

        let requested = estimate_tokens(prompt) + response_tokens;
        if requested > self.max_context_tokens {
            return Err(DebateError::ContextTooLarge {
                provider: provider.to_string(),
                requested,
                limit: self.max_context_tokens,
            });
        }

        Ok(forwarded)
    }
}

/// Rough token count: one token per four bytes of text.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}
