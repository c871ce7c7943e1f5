//! Chat client for the intervention agents.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. One request
//! per proposal attempt, hard timeout, no streaming.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::protocol::AgentError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Endpoint configuration, read from the environment by the binary.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_url: std::env::var("CRUCIBLE_LLM_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            api_key: std::env::var("CRUCIBLE_LLM_KEY").ok(),
            model: std::env::var("CRUCIBLE_LLM_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: std::env::var("CRUCIBLE_LLM_TEMPERATURE")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0.7),
        })
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    config: Arc<LlmConfig>,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Crucible/0.1.0")
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Send one system + user exchange, return the assistant text.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, AgentError> {
        let url = format!("{}/chat/completions", self.config.api_url);
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AgentError::Malformed("empty choices in chat response".to_string()))?;

        debug!(chars = content.len(), model = %self.config.model, "chat completion received");
        Ok(content)
    }
}
