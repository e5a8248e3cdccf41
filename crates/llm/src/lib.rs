use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

// ── Generation boundary ──────────────────────────────────────────────────────

/// Failure modes of a single generation request.
///
/// `RateLimited` is kept apart from everything else so callers can wait and
/// retry instead of giving up.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{provider} rate limit hit (HTTP 429)")]
    RateLimited { provider: &'static str },
    #[error("{provider} error ({status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} response missing text: {body}")]
    EmptyResponse {
        provider: &'static str,
        body: String,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl GenerateError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Text-generation capability: one system instruction plus one user prompt in,
/// plain text out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerateError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenRouter,
}

impl Provider {
    /// Parse a provider from its config label (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openrouter" | "openai" => Some(Self::OpenRouter),
            _ => None,
        }
    }
}

/// Everything a provider client needs to issue requests.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout: Duration,
}

/// Build the configured provider behind the [`Generator`] seam.
pub fn build_generator(settings: LlmSettings) -> Result<Arc<dyn Generator>, GenerateError> {
    let client = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()?;
    Ok(match settings.provider {
        Provider::Ollama => Arc::new(OllamaClient::new(client, settings)),
        Provider::OpenRouter => Arc::new(OpenRouterClient::new(client, settings)),
    })
}

fn map_status(provider: &'static str, status: reqwest::StatusCode, body: String) -> GenerateError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        GenerateError::RateLimited { provider }
    } else {
        GenerateError::Api {
            provider,
            status: status.as_u16(),
            body,
        }
    }
}

// ── Ollama ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, settings: LlmSettings) -> Self {
        Self { client, settings }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerateError> {
        let payload = json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "stream": false,
            "options": {
                "num_predict": self.settings.max_tokens,
                "temperature": self.settings.temperature
            }
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status("ollama", status, body));
        }

        let body: serde_json::Value = response.json().await?;
        match body
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
        {
            Some(content) => Ok(content.trim().to_string()),
            None => Err(GenerateError::EmptyResponse {
                provider: "ollama",
                body: body.to_string(),
            }),
        }
    }
}

// ── OpenRouter / OpenAI-compatible ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl OpenRouterClient {
    pub fn new(client: reqwest::Client, settings: LlmSettings) -> Self {
        Self { client, settings }
    }

    fn api_key() -> Option<String> {
        ["OPENROUTER_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|key| !key.trim().is_empty())
    }
}

#[async_trait]
impl Generator for OpenRouterClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerateError> {
        let Some(api_key) = Self::api_key() else {
            return Err(GenerateError::Configuration(
                "OPENROUTER_API_KEY (or OPENAI_API_KEY) is not set".to_string(),
            ));
        };

        let payload = json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature
        });

        let endpoint = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .header("X-Title", "Category Digest")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status("openrouter", status, body));
        }

        let body: serde_json::Value = response.json().await?;
        let choice = body.get("choices").and_then(|choices| choices.get(0));
        if let Some(reason) = choice
            .and_then(|choice| choice.get("finish_reason"))
            .and_then(|reason| reason.as_str())
        {
            if reason == "length" {
                debug!(model = %self.settings.model, "generation stopped at the max_tokens budget");
            }
        }

        match choice
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
        {
            Some(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
            _ => Err(GenerateError::EmptyResponse {
                provider: "openrouter",
                body: body.to_string(),
            }),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
