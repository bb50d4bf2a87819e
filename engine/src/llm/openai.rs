//! OpenAI-compatible chat-completions client

use super::{ChatModel, LlmError, ModelParams, Result};
use crate::config::LlmConfig;
use async_trait::async_trait;
use sdk::types::Turn;
use serde_json::json;
use std::time::Duration;

pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    /// Build a client from config, reading the API key from the configured
    /// environment variable
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            LlmError::AuthenticationFailed(format!("{} is not set", config.api_key_env))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Build a client against an explicit endpoint (tests, proxies)
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[Turn], params: &ModelParams) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut api_messages = Vec::new();
        for turn in messages {
            api_messages.push(json!({
                "role": turn.role.to_string(),
                "content": turn.content
            }));
        }

        let mut payload = json!({
            "model": params.model,
            "messages": api_messages,
        });
        if params.is_reasoning_model() {
            payload["reasoning_effort"] = json!(params.reasoning_effort);
        } else {
            payload["temperature"] = json!(params.temperature);
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthenticationFailed(text),
                429 => LlmError::RateLimitExceeded,
                _ => LlmError::InvalidRequest(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::ParseError("No content in response".to_string()))?;

        Ok(content.to_string())
    }
}
