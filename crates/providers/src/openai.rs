use std::time::Duration;

use async_trait::async_trait;
use leadline_core::config::AiConfig;
use leadline_core::executors::{CompletionClient, ProviderError};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::http::{build_client, ensure_success, transport_error, trim_base};

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 800;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions in JSON-object mode.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiCompletion {
    pub fn new(api_key: SecretString, config: &AiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            base_url: trim_base(&config.base_url),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletion {
    async fn complete_json(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| transport_error(error, self.timeout))?;
        let response = ensure_success("openai", response).await?;

        let parsed = response
            .json::<ChatResponse>()
            .await
            .map_err(|error| ProviderError::Upstream {
                status: 200,
                message: format!("openai: {error}"),
            })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::Upstream {
                status: 200,
                message: "openai: empty completion".to_string(),
            })?;

        tracing::debug!(
            event_name = "provider.ai.completed",
            model = %self.model,
            "completion received"
        );
        Ok(content)
    }
}
