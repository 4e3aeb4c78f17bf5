//! Completion provider: the typed seam over the external structured-output
//! generator.
//!
//! The trait keeps callers testable with in-memory doubles; the HTTP
//! implementation speaks an OpenAI-style chat-completions endpoint over the
//! blocking client, since every invoker call happens on the scheduler's
//! single worker thread.

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::GeneratorConfig;

/// Errors from the external generator call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generator returned an empty response")]
    EmptyResponse,
}

/// A blocking call to the external generator. Implementations are expected
/// to be slow, non-deterministic, and occasionally malformed — callers
/// validate and clamp, never trust blindly.
pub trait CompletionProvider: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Chat-completions response shape — only the fields we read.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// HTTP implementation over a chat-completions endpoint.
pub struct HttpProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(config: &GeneratorConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

impl CompletionProvider for HttpProvider {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.2,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json()?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(content)
    }
}
