//! Core data types shared by the indexing and chat pipeline.
//!
//! Documents are produced by a [`DocumentLoader`](crate::loader::DocumentLoader),
//! cut into [`Chunk`]s, embedded, and kept in the
//! [`VectorIndex`](crate::index::VectorIndex). [`ChatTurn`]s record the
//! conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file from the data directory with its extracted text.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier derived from the relative path.
    pub id: String,
    /// Path relative to the data directory, `/`-separated.
    pub path: String,
    pub file_name: String,
    pub content_type: String,
    pub modified_at: DateTime<Utc>,
    pub text: String,
}

/// A bounded slice of a document's text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Relative path of the source document, carried for prompt rendering.
    pub source_path: String,
    pub chunk_index: usize,
    pub text: String,
    pub hash: String,
}

/// A chunk returned by retrieval together with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}
