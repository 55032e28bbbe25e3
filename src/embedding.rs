//! Embedding service abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two HTTP-backed implementations:
//! - **[`GeminiEmbedder`]**: Google Generative Language API
//!   (`batchEmbedContents`), with separate task types for documents and queries.
//! - **[`OpenAIEmbedder`]**: OpenAI-compatible `POST /v1/embeddings`.
//!
//! Use [`create_embedder`] to pick one from configuration. Also provides
//! [`cosine_similarity`] for ranking.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::{EmbeddingConfig, Provider};
use crate::credentials::ApiKey;
use crate::http::{client_with_timeout, send_json, ServiceError};

/// Turns text into fixed-dimension vectors.
///
/// Documents and queries are embedded through separate methods because some
/// models encode them asymmetrically.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"models/embedding-001"`).
    fn model_name(&self) -> &str;

    /// Provider name (e.g. `"gemini"`).
    fn provider(&self) -> &str;

    /// Base URL the vectors come from.
    fn endpoint(&self) -> &str;

    /// Embed chunk texts; returns one vector per input, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Create the embedder selected by `[embedding].provider`.
pub fn create_embedder(config: &EmbeddingConfig, key: &ApiKey) -> Result<Box<dyn Embedder>> {
    match config.provider {
        Provider::Gemini => Ok(Box::new(GeminiEmbedder::new(config, key)?)),
        Provider::OpenAI => Ok(Box::new(OpenAIEmbedder::new(config, key)?)),
    }
}

/// Check that a provider returned exactly one vector per input, all of the
/// same non-zero dimension.
pub fn check_vectors(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "embedding service returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    if let Some(first) = vectors.first() {
        let dims = first.len();
        if dims == 0 {
            bail!("embedding service returned an empty vector");
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            bail!(
                "embedding service returned mixed dimensions ({} and {})",
                dims,
                bad.len()
            );
        }
    }
    Ok(())
}

/// `"embedding-001"` and `"models/embedding-001"` both name the same Gemini model.
pub(crate) fn gemini_model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// ============ Gemini ============

pub struct GeminiEmbedder {
    client: reqwest::Client,
    model: String,
    endpoint: String,
    url: String,
    api_key: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct GeminiBatchResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig, key: &ApiKey) -> Result<Self> {
        let model = gemini_model_path(&config.model);
        let endpoint = config.endpoint().trim_end_matches('/').to_string();
        let url = format!("{}/v1beta/{}:batchEmbedContents", endpoint, model);
        Ok(Self {
            client: client_with_timeout(config.timeout_secs)?,
            model,
            endpoint,
            url,
            api_key: key.expose().to_string(),
            max_retries: config.max_retries,
        })
    }

    async fn embed_batch(&self, texts: &[String], task_type: &str) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|t| {
                json!({
                    "model": self.model,
                    "content": { "parts": [{ "text": t }] },
                    "taskType": task_type,
                })
            })
            .collect();
        let body = json!({ "requests": requests });

        debug!(model = %self.model, inputs = texts.len(), task_type, "POST {}", self.url);
        let response: GeminiBatchResponse = send_json("Gemini embeddings", self.max_retries, || {
            self.client
                .post(&self.url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        let vectors: Vec<Vec<f32>> = response.embeddings.into_iter().map(|e| e.values).collect();
        check_vectors(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        Provider::Gemini.as_str()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_batch(texts, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embed_batch(&[text.to_string()], "RETRIEVAL_QUERY")
            .await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::decode("Gemini embeddings", "no embedding returned").into())
    }
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    endpoint: String,
    url: String,
    api_key: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, key: &ApiKey) -> Result<Self> {
        let endpoint = config.endpoint().trim_end_matches('/').to_string();
        Ok(Self {
            client: client_with_timeout(config.timeout_secs)?,
            model: config.model.clone(),
            url: format!("{}/v1/embeddings", endpoint),
            endpoint,
            api_key: key.expose().to_string(),
            max_retries: config.max_retries,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.model, "input": texts });

        debug!(model = %self.model, inputs = texts.len(), "POST {}", self.url);
        let response: OpenAIEmbeddingResponse =
            send_json("OpenAI embeddings", self.max_retries, || {
                self.client
                    .post(&self.url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;

        let mut items = response.data;
        items.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = items.into_iter().map(|item| item.embedding).collect();
        check_vectors(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        Provider::OpenAI.as_str()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_batch(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::decode("OpenAI embeddings", "no embedding returned").into())
    }
}

/// Cosine similarity of two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
