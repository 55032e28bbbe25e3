//! Document loading from the local data directory.
//!
//! [`DocumentLoader`] is the seam the index builder consumes; the stock
//! implementation, [`DirectoryLoader`], walks `[data].dir`, applies include and
//! exclude globs, and extracts text from each file (see [`crate::extract`]).
//!
//! Files that cannot be turned into text (binary, broken PDFs, oversized) are
//! skipped with a warning. A missing data directory or a file that cannot be
//! read is an error. Walking and extraction run on tokio's blocking pool.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DataConfig;
use crate::extract::{extract_text, DocumentFormat};
use crate::models::Document;

/// Source of the documents to index.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load every document. Ordering must be deterministic.
    async fn load(&self) -> Result<Vec<Document>>;

    /// Short human-readable description of where documents come from.
    fn describe(&self) -> String;

    /// A value that changes whenever [`load`](DocumentLoader::load) would
    /// return different documents. Used to invalidate cached indexes.
    async fn fingerprint(&self) -> Result<String>;
}

/// A file selected by the include/exclude rules, before it is read.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    relative: String,
    size: u64,
    modified: SystemTime,
}

/// Loads every matching file below a directory.
pub struct DirectoryLoader {
    rules: Arc<ScanRules>,
}

/// What to walk and which files to keep.
struct ScanRules {
    config: DataConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl DirectoryLoader {
    pub fn new(config: &DataConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            rules: Arc::new(ScanRules {
                config: config.clone(),
                include,
                exclude,
            }),
        })
    }

    /// Run filesystem work off the async worker threads.
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ScanRules) -> Result<T> + Send + 'static,
    {
        let rules = self.rules.clone();
        tokio::task::spawn_blocking(move || work(&rules))
            .await
            .context("Directory scan task failed")?
    }
}

impl ScanRules {
    fn scan(&self) -> Result<Vec<Candidate>> {
        let root = &self.config.dir;
        if !root.is_dir() {
            bail!("Data directory does not exist: {}", root.display());
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(root).follow_links(self.config.follow_symlinks) {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if self.exclude.is_match(&relative) || !self.include.is_match(&relative) {
                continue;
            }

            let metadata = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            candidates.push(Candidate {
                path: path.to_path_buf(),
                relative,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        candidates.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(candidates)
    }

    fn read_candidate(&self, c: &Candidate) -> Result<Option<Document>> {
        if c.size > self.config.max_file_bytes {
            warn!(
                path = %c.relative,
                size = c.size,
                limit = self.config.max_file_bytes,
                "skipping file over size limit"
            );
            return Ok(None);
        }

        let bytes =
            std::fs::read(&c.path).with_context(|| format!("Failed to read {}", c.path.display()))?;
        let format = DocumentFormat::from_path(&c.path);
        let text = match extract_text(&bytes, format) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %c.relative, error = %e, "skipping file");
                return Ok(None);
            }
        };
        if text.trim().is_empty() {
            warn!(path = %c.relative, "skipping file with no text");
            return Ok(None);
        }

        let file_name = c
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Some(Document {
            id: document_id(&c.relative),
            path: c.relative.clone(),
            file_name,
            content_type: format.content_type().to_string(),
            modified_at: DateTime::<Utc>::from(c.modified),
            text,
        }))
    }

    fn load_all(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for c in self.scan()? {
            if let Some(doc) = self.read_candidate(&c)? {
                debug!(path = %doc.path, bytes = doc.text.len(), "loaded document");
                documents.push(doc);
            }
        }
        Ok(documents)
    }

    /// SHA-256 over the sorted (path, size, mtime) of every matching file.
    ///
    /// Any added, removed, resized, or touched file changes the fingerprint.
    fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for c in self.scan()? {
            let mtime = c
                .modified
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            hasher.update(c.relative.as_bytes());
            hasher.update([0u8]);
            hasher.update(c.size.to_le_bytes());
            hasher.update(mtime.to_le_bytes());
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    async fn load(&self) -> Result<Vec<Document>> {
        self.blocking(ScanRules::load_all).await
    }

    fn describe(&self) -> String {
        self.rules.config.dir.display().to_string()
    }

    async fn fingerprint(&self) -> Result<String> {
        self.blocking(ScanRules::fingerprint).await
    }
}

/// Stable document id: hex SHA-256 of the relative path.
pub fn document_id(relative_path: &str) -> String {
    format!("{:x}", Sha256::digest(relative_path.as_bytes()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
