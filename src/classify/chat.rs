use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Classifier, SYSTEM_PROMPT};
use crate::config::ClassifierConfig;
use crate::{ReelError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for an OpenAI-compatible chat completions endpoint (Groq by default)
pub struct ChatClassifier {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl ChatClassifier {
    pub fn new(config: &ClassifierConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: api_key.or_else(|| config.api_key.clone()),
        }
    }

    fn request(&self, context: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: context.to_string(),
                },
            ],
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

fn service_error(message: String) -> anyhow::Error {
    ReelError::ClassificationServiceError(message).into()
}

#[async_trait]
impl Classifier for ChatClassifier {
    async fn complete(&self, context: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| service_error("no API key configured (set GROQ_API_KEY or classifier.api_key)".to_string()))?;

        tracing::info!(
            model = %self.model,
            prompt_len = context.len(),
            "Sending classification request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&self.request(context))
            .send()
            .await
            .map_err(|e| service_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(service_error(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| service_error(format!("unexpected response body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| service_error("response contained no choices".to_string()))?;

        tracing::debug!(chars = content.len(), "Classifier response received");
        Ok(content.trim().to_string())
    }
}
