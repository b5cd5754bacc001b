//! Chat-model clients for answer generation.
//!
//! A [`Generator`] turns an ordered list of chat messages into one reply.
//! Clients make exactly one request per call: no retries, no streaming.
//! Connection failures map to [`GenerationError::Unavailable`], non-2xx
//! responses to [`GenerationError::Backend`], and blank replies to
//! [`GenerationError::EmptyOutput`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::models::ChatMessage;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a reply to `messages`. The returned text is trimmed and
    /// never empty.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;
}

fn http_client(timeout_secs: Option<u64>) -> Result<Client> {
    let mut builder = Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

fn non_empty(text: &str) -> Result<String, GenerationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::EmptyOutput);
    }
    Ok(trimmed.to_string())
}

fn send_error(url: &str, err: reqwest::Error) -> GenerationError {
    if err.is_connect() || err.is_timeout() {
        GenerationError::Unavailable(format!("{}: {}", url, err))
    } else {
        GenerationError::Backend(format!("{}: {}", url, err))
    }
}

// ============ Ollama ============

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Client for Ollama's `POST /api/chat`.
pub struct OllamaGenerator {
    client: Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.url);
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        tracing::info!(model = %self.model, messages = messages.len(), "generating answer");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "Ollama returned HTTP {}: {}",
                status, body
            )));
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(|e| {
            GenerationError::Backend(format!("Failed to parse Ollama response: {}", e))
        })?;

        non_empty(&parsed.message.map(|m| m.content).unwrap_or_default())
    }
}

// ============ OpenAI ============

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible `POST /v1/chat/completions`.
///
/// Reads the key from `OPENAI_API_KEY` at construction.
pub struct OpenAiGenerator {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Self::with_key(config, api_key)
    }

    fn with_key(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.url);
        let request = OpenAiChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages,
        };

        tracing::info!(model = %self.model, messages = messages.len(), "generating answer");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Backend(format!(
                "OpenAI returned HTTP {}: {}",
                status, body
            )));
        }

        let parsed: OpenAiChatResponse = response.json().await.map_err(|e| {
            GenerationError::Backend(format!("Failed to parse OpenAI response: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        non_empty(&content)
    }
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
