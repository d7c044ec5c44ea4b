use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{ChatCompletion, ChatMessage, ChatTransport};
use crate::config::LlmConfig;

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// OpenAI-compatible chat transport. Works against any endpoint speaking
/// the same wire format via `base_url`.
pub struct OpenAiTransport {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl OpenAiTransport {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChatTransport for OpenAiTransport {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion> {
        let req_messages = messages
            .iter()
            .map(|m| OpenAiMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let req = OpenAiRequest {
            model: &self.model,
            messages: req_messages,
            temperature: 0.0,
        };
        let res = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            // The status line stays in the message so the error classifier
            // can recognize 401/429 conditions from any compatible backend.
            return Err(anyhow!(
                "OpenAI API error ({}): {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: ChatCompletion = res.json().await?;
        Ok(parsed)
    }
}
