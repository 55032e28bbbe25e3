//! Paragraph-boundary text chunker.
//!
//! Splits a document's text into [`Chunk`]s that respect a `max_tokens`
//! limit. Splitting happens on paragraph boundaries (`\n\n`) where possible;
//! a paragraph longer than the limit is cut at the last newline or space that
//! fits. With a non-zero overlap, every chunk after the first starts with the
//! tail of its predecessor so that sentences straddling a boundary stay
//! retrievable.
//!
//! Chunk ids are derived from the document id and chunk index, so rebuilding
//! an unchanged directory produces identical chunks.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document into chunks with contiguous indices starting at 0.
/// Documents with no non-whitespace text yield no chunks.
pub fn chunk_document(doc: &Document, max_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    split_text(&doc.text, max_tokens, overlap_tokens)
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(doc, index, text))
        .collect()
}

/// Split text into pieces of at most `max_tokens * 4` bytes, overlap included.
pub fn split_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;
    // Room left for the overlap tail and its joining space.
    let fill_chars = if overlap_chars == 0 {
        max_chars
    } else {
        max_chars.saturating_sub(overlap_chars + 1).max(1)
    };

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            trimmed.len()
        } else {
            current.len() + 2 + trimmed.len()
        };
        if would_be > fill_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if trimmed.len() > fill_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let cut = split_point(remaining, fill_chars);
                let piece = remaining[..cut].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[cut..];
            }
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(trimmed);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    if overlap_chars == 0 || pieces.len() < 2 {
        return pieces;
    }

    let mut with_overlap = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 {
            with_overlap.push(piece.clone());
            continue;
        }
        let budget = overlap_chars.min(max_chars.saturating_sub(piece.len() + 1));
        let tail = if budget == 0 {
            ""
        } else {
            overlap_tail(&pieces[i - 1], budget)
        };
        if tail.is_empty() {
            with_overlap.push(piece.clone());
        } else {
            with_overlap.push(format!("{} {}", tail, piece));
        }
    }
    with_overlap
}

/// Byte offset at which to cut `s` so that the head is at most `max_chars`
/// bytes, preferring the last newline, then the last space. Always on a char
/// boundary and always > 0 for non-empty input.
fn split_point(s: &str, max_chars: usize) -> usize {
    if s.len() <= max_chars {
        return s.len();
    }
    let mut limit = max_chars;
    while limit > 0 && !s.is_char_boundary(limit) {
        limit -= 1;
    }
    if limit == 0 {
        // A single char wider than the limit.
        return s.chars().next().map(|c| c.len_utf8()).unwrap_or(s.len());
    }
    let head = &s[..limit];
    head.rfind('\n')
        .or_else(|| head.rfind(' '))
        .filter(|&pos| pos > 0)
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

/// The last at-most-`overlap_chars` bytes of `s`, starting at a word boundary.
fn overlap_tail(s: &str, overlap_chars: usize) -> &str {
    if s.len() <= overlap_chars {
        return s;
    }
    let mut start = s.len() - overlap_chars;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    let tail = &s[start..];
    if s[..start].ends_with(char::is_whitespace) {
        return tail.trim_start();
    }
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => "",
    }
}

fn make_chunk(doc: &Document, index: usize, text: String) -> Chunk {
    let mut id_hasher = Sha256::new();
    id_hasher.update(doc.id.as_bytes());
    id_hasher.update(index.to_le_bytes());
    let id = format!("{:x}", id_hasher.finalize());

    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));

    Chunk {
        id,
        document_id: doc.id.clone(),
        source_path: doc.path.clone(),
        chunk_index: index,
        text,
        hash,
    }
}
