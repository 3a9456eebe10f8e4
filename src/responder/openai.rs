//! OpenAI-compatible responder
//!
//! SECURITY: the API key is ONLY sent to the configured endpoint, which
//! defaults to the official OpenAI chat completions URL.

use super::Responder;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;

/// Official OpenAI API endpoint - API key is ONLY sent here by default
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiResponder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiResponder {
    pub fn new() -> Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: OPENAI_API_URL.to_string(),
            max_tokens: 1000,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    fn name(&self) -> &str {
        "openai"
    }

    async fn reply(&self, model_tag: &str, prompt: &str) -> Result<String> {
        let request = ChatCompletionRequest {
            model: model_tag,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.7,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to reach chat completions endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completions API error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .context("No response generated")
    }
}
