//! # Completion Client Module
//!
//! ## Purpose
//! Client for the external text-completion service used to phrase grounded
//! answers. The answer pipeline treats this service as optional: any failure
//! here degrades to the deterministic fallback template, it never fails a
//! question.
//!
//! ## Input/Output Specification
//! - **Input**: System and user prompts assembled by the answerer
//! - **Output**: Completion text, or `CompletionUnavailable` on any transport,
//!   status, or shape problem
//! - **Timeouts**: Enforced at the HTTP client level from configuration

use crate::config::CompletionConfig;
use crate::errors::{Result, RulebookError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Service-agnostic completion interface.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Request a completion for the given prompts.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// HTTP client speaking the chat-completions wire format.
pub struct HttpCompletionClient {
    config: CompletionConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl HttpCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            RulebookError::CompletionUnavailable {
                details: format!("request failed: {}", e),
            }
        })?;

        if !response.status().is_success() {
            return Err(RulebookError::CompletionUnavailable {
                details: format!("service returned status {}", response.status()),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            RulebookError::CompletionUnavailable {
                details: format!("malformed response: {}", e),
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| RulebookError::CompletionUnavailable {
                details: "response contained no choices".to_string(),
            })?;

        if content.trim().is_empty() {
            return Err(RulebookError::CompletionUnavailable {
                details: "response contained empty completion".to_string(),
            });
        }

        Ok(content)
    }
}
