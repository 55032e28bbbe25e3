//! Deterministic stand-ins for the external services, shared by the
//! integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use docchat::completion::CompletionService;
use docchat::embedding::Embedder;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const STORY: &str = "Anya was the expedition linguist aboard the survey ship.\n\n\
When the probe returned images from Proxima Centauri b, she noticed that each \
carving showed the same river valley with more and more buildings. Ordering the \
images by the erosion of the stone revealed a timeline of the civilization, \
from the first villages to the great cities and finally the empty ruins.";

pub const QUESTION_ONE: &str = "how did Anya figure out that the images depicted a timeline of the civilization on Proxima Centauri b?";
pub const QUESTION_TWO: &str = "Can you reframe what you just said?";

/// Write the one-document data directory used by the chat scenarios.
pub fn write_story(data_dir: &Path) {
    std::fs::create_dir_all(data_dir).unwrap();
    std::fs::write(data_dir.join("proxima.txt"), STORY).unwrap();
}

const DIMS: usize = 32;

/// Bag-of-words hashing embedder. Similar texts get similar vectors.
#[derive(Default)]
pub struct HashEmbedder {
    pub document_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub endpoint: String,
}

impl HashEmbedder {
    /// Same model, served from a different base URL.
    pub fn at(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Self::default()
        }
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let h = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            v[h % DIMS] += 1.0;
        }
        v[0] += 0.01;
        v
    }

    pub fn documents_embedded(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "test/hash"
    }

    fn provider(&self) -> &str {
        "test"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.document_calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }
}

/// Records every prompt and answers with a numbered reply. Can be switched
/// to fail.
#[derive(Default)]
pub struct ScriptedLlm {
    pub prompts: Mutex<Vec<String>>,
    pub failing: AtomicBool,
}

impl ScriptedLlm {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    fn model_name(&self) -> &str {
        "test/scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("completion service unavailable");
        }
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_string());
        Ok(format!(
            " She ordered the carvings by erosion (answer {}).\n",
            prompts.len()
        ))
    }
}
