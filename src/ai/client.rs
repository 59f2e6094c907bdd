use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::enrichment::fallback::truncate_chars;
use crate::error::Result;
use crate::models::{FailureKind, GenerationResult};

use super::TextGenerator;

/// Both slug and summary prompts are sampled at the same temperature.
const TEMPERATURE: f32 = 0.7;

const ERROR_BODY_LOG_CHARS: usize = 300;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.api_key().map(str::to_string),
            config.openai_base_url.clone(),
            config.model.clone(),
            config.request_timeout(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn complete(
        &self,
        api_key: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<String, FailureKind> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                %status,
                body = %truncate_chars(&body, ERROR_BODY_LOG_CHARS),
                "Text generation API error"
            );
            return Err(FailureKind::ServiceError);
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                tracing::error!("Text generation response carried no content");
                FailureKind::ServiceError
            })
    }
}

fn classify_transport_error(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        tracing::warn!(error = %err, "Text generation request timed out");
        FailureKind::Timeout
    } else {
        tracing::error!(error = %err, "Text generation request failed");
        FailureKind::ServiceError
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> GenerationResult {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("Text generation API key not configured");
            return GenerationResult::Failed(FailureKind::Unconfigured);
        };

        if prompt.trim().is_empty() || max_tokens == 0 {
            tracing::error!(max_tokens, "Refusing text generation with empty prompt or budget");
            return GenerationResult::Failed(FailureKind::ServiceError);
        }

        match self.complete(api_key, prompt, max_tokens).await {
            Ok(text) => GenerationResult::Success(text),
            Err(kind) => GenerationResult::Failed(kind),
        }
    }

    fn model_version(&self) -> &str {
        &self.model
    }
}
