//! The in-memory vector index.
//!
//! [`build_index`] runs the whole pipeline once: load documents, chunk them,
//! embed the chunks in batches, and assemble a [`VectorIndex`]. The result is
//! read-only and is shared behind an `Arc` for the rest of the process.
//!
//! Retrieval goes through the [`EmbeddingIndex`] trait so the query engine
//! does not care how similarity search is done. [`SemanticRetriever`] is the
//! stock implementation: embed the query, then brute-force cosine similarity
//! over every stored vector.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::embedding::{check_vectors, cosine_similarity, Embedder};
use crate::loader::DocumentLoader;
use crate::models::{Chunk, ScoredChunk};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};

/// A chunk and its embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// What an index was built from. Two indexes with equal metadata (ignoring
/// `built_at`) were built from the same inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_provider: String,
    #[serde(default)]
    pub embedding_endpoint: String,
    pub dims: usize,
    pub documents: usize,
    pub fingerprint: String,
    pub chunking: ChunkSettings,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSettings {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl From<&ChunkingConfig> for ChunkSettings {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            max_tokens: c.max_tokens,
            overlap_tokens: c.overlap_tokens,
        }
    }
}

/// Chunks paired with their embeddings, in build order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub metadata: IndexMetadata,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn new(metadata: IndexMetadata, entries: Vec<IndexedChunk>) -> Self {
        Self { metadata, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `top_k` chunks most similar to `query_vec`, best first.
    /// Equal scores keep build order.
    pub fn search(&self, query_vec: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query_vec, &e.vector)))
            .collect();
        // Stable sort, so ties stay in build order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }
}

/// Retrieval capability consumed by the query engine.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// The `top_k` chunks most relevant to `query`, best first.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>>;
}

/// Embeds the query with the same model as the index, then searches it.
pub struct SemanticRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl SemanticRetriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }
}

#[async_trait]
impl EmbeddingIndex for SemanticRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;
        if query_vec.len() != self.index.metadata.dims {
            anyhow::bail!(
                "query embedding has {} dimensions but the index has {}; rebuild the index",
                query_vec.len(),
                self.index.metadata.dims
            );
        }
        Ok(self.index.search(&query_vec, top_k))
    }
}

/// Load, chunk, and embed every document into a new index.
///
/// Any loader or embedding failure aborts the build; there is no partial
/// index.
pub async fn build_index(
    loader: &dyn DocumentLoader,
    embedder: &dyn Embedder,
    chunking: &ChunkingConfig,
    batch_size: usize,
    fingerprint: String,
    progress: &dyn IndexProgressReporter,
) -> Result<VectorIndex> {
    progress.report(IndexProgressEvent::Loading {
        source: loader.describe(),
    });
    let documents = loader.load().await?;

    let chunks: Vec<Chunk> = documents
        .iter()
        .flat_map(|doc| chunk_document(doc, chunking.max_tokens, chunking.overlap_tokens))
        .collect();
    progress.report(IndexProgressEvent::Chunked {
        documents: documents.len(),
        chunks: chunks.len(),
    });

    let total = chunks.len();
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(total);
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = embedder
            .embed_documents(&texts)
            .await
            .with_context(|| {
                format!(
                    "Failed to embed chunks {}..{}",
                    vectors.len(),
                    vectors.len() + batch.len()
                )
            })?;
        check_vectors(batch.len(), &batch_vectors)?;
        vectors.extend(batch_vectors);
        progress.report(IndexProgressEvent::Embedding {
            done: vectors.len(),
            total,
        });
    }

    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        anyhow::bail!(
            "embedding dimensions changed during build ({} and {})",
            dims,
            bad.len()
        );
    }

    let entries: Vec<IndexedChunk> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexedChunk { chunk, vector })
        .collect();

    info!(
        documents = documents.len(),
        chunks = entries.len(),
        dims,
        model = embedder.model_name(),
        "index built"
    );
    progress.report(IndexProgressEvent::Ready {
        chunks: entries.len(),
    });

    Ok(VectorIndex::new(
        IndexMetadata {
            embedding_model: embedder.model_name().to_string(),
            embedding_provider: embedder.provider().to_string(),
            embedding_endpoint: embedder.endpoint().to_string(),
            dims,
            documents: documents.len(),
            fingerprint,
            chunking: ChunkSettings::from(chunking),
            built_at: Utc::now(),
        },
        entries,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                id: id.to_string(),
                document_id: "d".to_string(),
                source_path: "d.txt".to_string(),
                chunk_index: 0,
                text: id.to_string(),
                hash: String::new(),
            },
            vector,
        }
    }

    fn index(entries: Vec<IndexedChunk>) -> VectorIndex {
        VectorIndex::new(
            IndexMetadata {
                embedding_model: "test".to_string(),
                embedding_provider: "test".to_string(),
                embedding_endpoint: String::new(),
                dims: 2,
                documents: 1,
                fingerprint: String::new(),
                chunking: ChunkSettings {
                    max_tokens: 10,
                    overlap_tokens: 0,
                },
                built_at: Utc::now(),
            },
            entries,
        )
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let idx = index(vec![
            entry("far", vec![0.0, 1.0]),
            entry("near", vec![1.0, 0.1]),
            entry("exact", vec![1.0, 0.0]),
        ]);
        let hits = idx.search(&[1.0, 0.0], 2);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_search_ties_keep_build_order() {
        let idx = index(vec![
            entry("first", vec![1.0, 0.0]),
            entry("second", vec![2.0, 0.0]),
            entry("third", vec![3.0, 0.0]),
        ]);
        let hits = idx.search(&[1.0, 0.0], 3);
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_search_top_k_larger_than_index() {
        let idx = index(vec![entry("only", vec![1.0, 0.0])]);
        assert_eq!(idx.search(&[1.0, 0.0], 10).len(), 1);
        assert!(index(vec![]).search(&[1.0, 0.0], 3).is_empty());
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "test"
        }

        fn provider(&self) -> &str {
            "test"
        }

        fn endpoint(&self) -> &str {
            ""
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_retrieve_rejects_query_of_wrong_dimension() {
        let idx = Arc::new(index(vec![entry("a", vec![1.0, 0.0])]));

        let wrong = SemanticRetriever::new(idx.clone(), Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])));
        let err = wrong.retrieve("q", 2).await.unwrap_err();
        assert!(err.to_string().contains("3 dimensions"), "{}", err);

        let right = SemanticRetriever::new(idx, Arc::new(FixedEmbedder(vec![1.0, 0.0])));
        let hits = right.retrieve("q", 2).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.99);
    }
}
