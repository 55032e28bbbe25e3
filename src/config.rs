//! TOML configuration parsing and validation.
//!
//! Every section has defaults that reproduce the stock setup: documents in
//! `./data`, Gemini for both embeddings and completions, 1024-token chunks,
//! and the top two chunks handed to the model per question. A config file
//! only needs to list what it changes.
//!
//! ```toml
//! [data]
//! dir = "docs"
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [credentials]
//! api_key_env = "OPENAI_API_KEY"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./config/docchat.toml";

/// The questions asked by `docchat demo` when `[demo].questions` is not set.
pub const DEFAULT_DEMO_QUESTIONS: [&str; 2] = [
    "how did Anya figure out that the images depicted a timeline of the civilization on Proxima Centauri b?",
    "Can you reframe what you just said?",
];

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub credentials: CredentialsConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    pub max_file_bytes: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            overlap_tokens: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 2 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Name of the environment variable holding the API key shared by the
    /// embedding and completion services.
    pub api_key_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

/// External service flavour used by [`EmbeddingConfig`] and [`LlmConfig`].
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenAI,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAI => "openai",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::OpenAI => "https://api.openai.com",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    pub model: String,
    pub endpoint: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: "models/embedding-001".to_string(),
            endpoint: None,
            batch_size: 64,
            max_retries: 0,
            timeout_secs: 60,
        }
    }
}

impl EmbeddingConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub endpoint: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: "models/gemini-1.5-flash".to_string(),
            endpoint: None,
            temperature: None,
            max_output_tokens: None,
            max_retries: 0,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(".docchat/index.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Web sessions unused for this long are dropped.
    pub session_idle_secs: u64,
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8501".to_string(),
            session_idle_secs: 60 * 60,
            max_sessions: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DemoConfig {
    pub questions: Vec<String>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            questions: DEFAULT_DEMO_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        }
    }
}

/// Load and validate a config file.
///
/// When `path` is the default location and no file exists there, the
/// built-in defaults are used instead. An explicitly given path that does
/// not exist is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }
    if config.llm.model.trim().is_empty() {
        bail!("llm.model must not be empty");
    }
    if config.credentials.api_key_env.trim().is_empty() {
        bail!("credentials.api_key_env must not be empty");
    }
    if config.demo.questions.is_empty() {
        bail!("demo.questions must contain at least one question");
    }
    if config.server.max_sessions == 0 {
        bail!("server.max_sessions must be >= 1");
    }
    if config.server.session_idle_secs == 0 {
        bail!("server.session_idle_secs must be > 0");
    }
    if config.data.include_globs.is_empty() {
        bail!("data.include_globs must contain at least one pattern");
    }
    Ok(())
}
