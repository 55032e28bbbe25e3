//! Memoized index with directory-change invalidation.
//!
//! Embedding a directory costs one external request per batch of chunks, so
//! the built [`VectorIndex`] is kept for the life of the process and, when
//! `[cache].enabled`, persisted to disk between runs.
//!
//! A memoized or persisted index is reused only while it matches:
//! - the loader's fingerprint (any added, removed, or modified file),
//! - the embedding provider, endpoint, and model, and
//! - the chunking settings.
//!
//! Anything else triggers a rebuild.

use anyhow::{Context, Result};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::index::{build_index, ChunkSettings, VectorIndex};
use crate::loader::DocumentLoader;
use crate::progress::IndexProgressReporter;

/// Where an index returned by [`IndexCache::get_or_build`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Memory,
    Disk,
    Built,
}

pub struct IndexCache {
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    batch_size: usize,
    persist_path: Option<PathBuf>,
    memo: Mutex<Option<Arc<VectorIndex>>>,
}

impl IndexCache {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        batch_size: usize,
        persist_path: Option<PathBuf>,
    ) -> Self {
        Self {
            loader,
            embedder,
            chunking,
            batch_size,
            persist_path,
            memo: Mutex::new(None),
        }
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    /// Return the current index, building it if there is none or the
    /// directory changed since it was built.
    pub async fn get_or_build(
        &self,
        progress: &dyn IndexProgressReporter,
    ) -> Result<(Arc<VectorIndex>, IndexSource)> {
        let fingerprint = self.loader.fingerprint().await?;
        let mut memo = self.memo.lock().await;

        if let Some(index) = memo.as_ref() {
            if self.is_current(index, &fingerprint) {
                return Ok((index.clone(), IndexSource::Memory));
            }
            info!("data directory changed, rebuilding index");
        }

        if let Some(path) = &self.persist_path {
            if let Some(index) = self.read_persisted(path, &fingerprint) {
                let index = Arc::new(index);
                *memo = Some(index.clone());
                return Ok((index, IndexSource::Disk));
            }
        }

        let index = build_index(
            self.loader.as_ref(),
            self.embedder.as_ref(),
            &self.chunking,
            self.batch_size,
            fingerprint,
            progress,
        )
        .await?;

        if let Some(path) = &self.persist_path {
            if let Err(e) = write_persisted(path, &index) {
                warn!(path = %path.display(), error = %e, "failed to persist index");
            }
        }

        let index = Arc::new(index);
        *memo = Some(index.clone());
        Ok((index, IndexSource::Built))
    }

    /// Drop the memoized index so the next [`get_or_build`](Self::get_or_build)
    /// re-checks disk and rebuilds if needed.
    pub async fn invalidate(&self) {
        *self.memo.lock().await = None;
    }

    fn is_current(&self, index: &VectorIndex, fingerprint: &str) -> bool {
        let m = &index.metadata;
        m.fingerprint == fingerprint
            && m.embedding_model == self.embedder.model_name()
            && m.embedding_provider == self.embedder.provider()
            && m.embedding_endpoint == self.embedder.endpoint()
            && m.chunking == ChunkSettings::from(&self.chunking)
    }

    fn read_persisted(&self, path: &Path, fingerprint: &str) -> Option<VectorIndex> {
        if !path.exists() {
            return None;
        }
        match read_index_file(path) {
            Ok(index) if self.is_current(&index, fingerprint) => {
                info!(path = %path.display(), chunks = index.len(), "loaded cached index");
                Some(index)
            }
            Ok(_) => {
                info!(path = %path.display(), "cached index is stale");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable index cache");
                None
            }
        }
    }
}

fn read_index_file(path: &Path) -> Result<VectorIndex> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let index = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(index)
}

/// Write to a sibling temp file, then rename over the target.
fn write_persisted(path: &Path, index: &VectorIndex) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = std::fs::File::create(&tmp)
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, index)?;
    writer.flush()?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move index cache into {}", path.display()))?;
    info!(path = %path.display(), "index cache written");
    Ok(())
}
