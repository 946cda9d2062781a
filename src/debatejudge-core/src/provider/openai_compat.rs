//! Client for OpenAI-compatible chat-completion APIs.
//!
//! OpenAI, DeepSeek and SiliconFlow all speak the same wire protocol and only
//! differ in base URL, key and capabilities, so one client serves all three.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, StopConfiguration,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

use super::{ModelConfig, Prompt, ProviderClient, ProviderResponse, Usage, sanitize_response};
use crate::capability::{CapabilityDescriptor, Parameter};
use crate::error::DebateError;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com/v1";
pub const SILICONFLOW_API_BASE: &str = "https://api.siliconflow.cn/v1";

pub struct OpenAICompatClient {
    name: String,
    client: Client<OpenAIConfig>,
    capabilities: CapabilityDescriptor,
}

impl OpenAICompatClient {
    pub fn new(
        name: impl Into<String>,
        api_base: &str,
        api_key: &str,
        capabilities: CapabilityDescriptor,
    ) -> Result<Self, DebateError> {
        let name = name.into();
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DebateError::provider(&name, format!("Failed to create HTTP client: {}", e)))?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Ok(Self {
            name,
            client: Client::with_config(config).with_http_client(http_client),
            capabilities,
        })
    }

    fn messages(prompt: &Prompt) -> Vec<ChatCompletionRequestMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &prompt.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: system.clone().into(),
                    name: None,
                },
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: prompt.user.clone().into(),
                name: None,
            },
        ));
        messages
    }

    /// Build the upstream request. Only one completion is ever returned to the
    /// caller, so asking for more is refused rather than paid for and dropped.
    fn build_request(
        &self,
        prompt: &Prompt,
        config: &ModelConfig,
    ) -> Result<CreateChatCompletionRequest, DebateError> {
        if config.n.is_some_and(|n| n > 1) {
            return Err(DebateError::UnsupportedCapability {
                provider: self.name.clone(),
                parameter: Parameter::MultiCompletion.to_string(),
            });
        }

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&config.model).messages(Self::messages(prompt));
        if let Some(max_tokens) = config.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = config.temperature {
            args.temperature(temperature);
        }
        if let Some(top_p) = config.top_p {
            args.top_p(top_p);
        }
        if let Some(penalty) = config.presence_penalty {
            args.presence_penalty(penalty);
        }
        if let Some(penalty) = config.frequency_penalty {
            args.frequency_penalty(penalty);
        }
        if !config.stop.is_empty() {
            args.stop(StopConfiguration::StringArray(config.stop.clone()));
        }
        args.build()
            .map_err(|e| DebateError::provider(&self.name, e.to_string()))
    }

    fn upstream_error(&self, error: OpenAIError) -> DebateError {
        let status = match &error {
            OpenAIError::Reqwest(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        };
        DebateError::ProviderError {
            provider: self.name.clone(),
            status,
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAICompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        config: &ModelConfig,
    ) -> Result<ProviderResponse, DebateError> {
        let request = self.build_request(prompt, config)?;

        debug!(provider = %self.name, model = %config.model, "sending chat completion");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| self.upstream_error(e))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(ProviderResponse {
            text: sanitize_response(&text),
            model: response.model,
            usage,
            created_at: DateTime::from_timestamp(i64::from(response.created), 0)
                .unwrap_or_else(Utc::now),
        })
    }
}
