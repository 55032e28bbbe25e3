//! Completion service abstraction and implementations.
//!
//! A [`CompletionService`] takes one fully rendered prompt and returns the
//! model's text. Two backends:
//! - **[`GeminiCompletion`]**: `POST /v1beta/{model}:generateContent`
//! - **[`OpenAICompletion`]**: `POST /v1/chat/completions`
//!
//! Both are single-shot and non-streaming.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tracing::debug;

use crate::config::{LlmConfig, Provider};
use crate::credentials::ApiKey;
use crate::embedding::gemini_model_path;
use crate::http::{client_with_timeout, send_json, ServiceError};

/// Generates natural-language text for a prompt.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Create the completion backend selected by `[llm].provider`.
pub fn create_completion_service(
    config: &LlmConfig,
    key: &ApiKey,
) -> Result<Box<dyn CompletionService>> {
    match config.provider {
        Provider::Gemini => Ok(Box::new(GeminiCompletion::new(config, key)?)),
        Provider::OpenAI => Ok(Box::new(OpenAICompletion::new(config, key)?)),
    }
}

// ============ Gemini ============

pub struct GeminiCompletion {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GeminiCompletion {
    pub fn new(config: &LlmConfig, key: &ApiKey) -> Result<Self> {
        let model = gemini_model_path(&config.model);
        let url = format!(
            "{}/v1beta/{}:generateContent",
            config.endpoint().trim_end_matches('/'),
            model
        );
        Ok(Self {
            client: client_with_timeout(config.timeout_secs)?,
            model,
            url,
            api_key: key.expose().to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        let mut generation = serde_json::Map::new();
        if let Some(t) = self.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(n) = self.max_output_tokens {
            generation.insert("maxOutputTokens".into(), json!(n));
        }
        if !generation.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(generation);
        }
        body
    }
}

/// Concatenate the text parts of the first candidate.
fn gemini_text(response: GenerateContentResponse) -> Result<String, ServiceError> {
    const SERVICE: &str = "Gemini completion";

    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(ServiceError::decode(SERVICE, format!("prompt blocked: {}", reason)));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(ServiceError::decode(
            SERVICE,
            format!("empty response (finish reason: {})", reason),
        ));
    }
    Ok(text)
}

#[async_trait]
impl CompletionService for GeminiCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let started = Instant::now();
        let body = self.request_body(prompt);
        let response: GenerateContentResponse =
            send_json("Gemini completion", self.max_retries, || {
                self.client
                    .post(&self.url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&body)
            })
            .await?;
        let text = gemini_text(response)?;
        debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            answer_len = text.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "completion"
        );
        Ok(text)
    }
}

// ============ OpenAI ============

pub struct OpenAICompletion {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
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
    content: Option<String>,
}

impl OpenAICompletion {
    pub fn new(config: &LlmConfig, key: &ApiKey) -> Result<Self> {
        Ok(Self {
            client: client_with_timeout(config.timeout_secs)?,
            model: config.model.clone(),
            url: format!(
                "{}/v1/chat/completions",
                config.endpoint().trim_end_matches('/')
            ),
            api_key: key.expose().to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = self.max_output_tokens {
            body["max_tokens"] = json!(n);
        }
        body
    }
}

#[async_trait]
impl CompletionService for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = self.request_body(prompt);
        let response: ChatCompletionResponse =
            send_json("OpenAI completion", self.max_retries, || {
                self.client
                    .post(&self.url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ServiceError::decode("OpenAI completion", "no choices returned"))?;
        Ok(text)
    }
}
