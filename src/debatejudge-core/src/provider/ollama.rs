//! Native Ollama chat client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ModelConfig, Prompt, ProviderClient, ProviderResponse, Usage, sanitize_response};
use crate::capability::CapabilityDescriptor;
use crate::error::DebateError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Client for a local or remote Ollama daemon (`/api/chat`, non-streaming).
pub struct OllamaClient {
    name: String,
    base_url: String,
    http: reqwest::Client,
    capabilities: CapabilityDescriptor,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Options::is_empty")]
    options: Options<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Options<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

impl Options<'_> {
    fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.num_predict.is_none()
            && self.presence_penalty.is_none()
            && self.frequency_penalty.is_none()
            && self.stop.is_empty()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl OllamaClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        capabilities: CapabilityDescriptor,
    ) -> Result<Self, DebateError> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DebateError::provider(&name, format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            capabilities,
        })
    }

    fn build_request<'a>(prompt: &'a Prompt, config: &'a ModelConfig) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &prompt.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });

        ChatRequest {
            model: &config.model,
            messages,
            stream: false,
            options: Options {
                temperature: config.temperature,
                top_p: config.top_p,
                num_predict: config.max_tokens,
                presence_penalty: config.presence_penalty,
                frequency_penalty: config.frequency_penalty,
                stop: &config.stop,
            },
        }
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
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
        let url = format!("{}/api/chat", self.base_url);
        debug!(provider = %self.name, model = %config.model, %url, "sending chat request");

        let response = self
            .http
            .post(&url)
            .json(&Self::build_request(prompt, config))
            .send()
            .await
            .map_err(|e| DebateError::ProviderError {
                provider: self.name.clone(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(DebateError::ProviderError {
                provider: self.name.clone(),
                status: Some(status.as_u16()),
                message,
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            DebateError::provider(&self.name, format!("Malformed response: {}", e))
        })?;

        Ok(ProviderResponse {
            text: sanitize_response(&body.message.content),
            model: body.model,
            usage: Usage::new(body.prompt_eval_count, body.eval_count),
            created_at: body.created_at.unwrap_or_else(Utc::now),
        })
    }
}
