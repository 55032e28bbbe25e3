//! Index build progress reporting.
//!
//! Building the index makes one embedding request per batch of chunks, which
//! can take a while for a large data directory. Progress goes to **stderr**
//! so stdout stays clean for the demo transcript.

use std::io::Write;

/// A single progress event emitted by [`build_index`](crate::index::build_index).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Reading and extracting documents.
    Loading { source: String },
    /// Documents have been split into chunks.
    Chunked { documents: usize, chunks: usize },
    /// `done` of `total` chunks have embeddings.
    Embedding { done: usize, total: usize },
    /// The index is complete.
    Ready { chunks: usize },
}

pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress lines on stderr.
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Loading { source } => format!("index  loading documents from {}\n", source),
            IndexProgressEvent::Chunked { documents, chunks } => format!(
                "index  {} documents  {} chunks\n",
                format_number(*documents as u64),
                format_number(*chunks as u64)
            ),
            IndexProgressEvent::Embedding { done, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*done as u64),
                format_number(*total as u64)
            ),
            IndexProgressEvent::Ready { chunks } => {
                format!("index  ready ({} chunks)\n", format_number(*chunks as u64))
            }
        };
        let _ = std::io::stderr().write_all(line.as_bytes());
        let _ = std::io::stderr().flush();
    }
}

/// Discards all events.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

/// Format a number with thousands separators (e.g. 1234 → "1,234").
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
