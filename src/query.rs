//! Retrieval-augmented query engine.
//!
//! One query is one retrieval plus one completion: fetch the `top_k` most
//! relevant chunks, render them into the QA prompt, and send it to the
//! [`CompletionService`]. Failures from either step propagate unchanged.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::completion::CompletionService;
use crate::index::EmbeddingIndex;
use crate::models::ScoredChunk;

/// A retrieved chunk cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub path: String,
    pub chunk_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

pub struct QueryEngine {
    retriever: Arc<dyn EmbeddingIndex>,
    llm: Arc<dyn CompletionService>,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        retriever: Arc<dyn EmbeddingIndex>,
        llm: Arc<dyn CompletionService>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            llm,
            top_k: top_k.max(1),
        }
    }

    pub async fn query(&self, text: &str) -> Result<QueryResponse> {
        let hits = self.retriever.retrieve(text, self.top_k).await?;
        let prompt = render_prompt(text, &hits);
        debug!(chunks = hits.len(), prompt_len = prompt.len(), "querying {}", self.llm.model_name());

        let answer = self.llm.complete(&prompt).await?;
        let sources = hits
            .iter()
            .map(|h| SourceRef {
                path: h.chunk.source_path.clone(),
                chunk_index: h.chunk.chunk_index,
                score: h.score,
            })
            .collect();

        Ok(QueryResponse {
            answer: answer.trim().to_string(),
            sources,
        })
    }
}

/// Render the text-QA prompt for `query` over the retrieved chunks.
pub fn render_prompt(query: &str, context: &[ScoredChunk]) -> String {
    let context_str = context
        .iter()
        .map(|c| format!("file_path: {}\n\n{}", c.chunk.source_path, c.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {}\n\
         Answer: ",
        context_str, query
    )
}
