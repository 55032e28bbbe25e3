//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat serve` | Start the web chat UI |
//! | `docchat demo` | Ask the scripted questions and print the answers |
//! | `docchat index` | Build or refresh the index for the data directory |
//! | `docchat ask "<question>"` | Answer one question without history |
//!
//! Every command checks for the API key before reading any document and
//! exits with an error when it is missing.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docchat::cache::{IndexCache, IndexSource};
use docchat::completion::{create_completion_service, CompletionService};
use docchat::config::{self, Config};
use docchat::credentials::{load_api_key, ApiKey};
use docchat::demo;
use docchat::embedding::create_embedder;
use docchat::index::SemanticRetriever;
use docchat::loader::DirectoryLoader;
use docchat::progress::StderrProgress;
use docchat::query::QueryEngine;
use docchat::server::{self, AppState};
use docchat::session::SessionLimits;

/// Chat with the documents in a local folder.
#[derive(Parser)]
#[command(name = "docchat", version, about = "Chat with your docs")]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// If the default file does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the chat UI over HTTP.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ask the configured demo questions in one conversation.
    Demo,

    /// Build the index, reusing the on-disk cache when it is current.
    Index {
        /// Ignore any cached index and rebuild from scratch.
        #[arg(long)]
        force: bool,
    },

    /// Answer a single question.
    Ask {
        /// The question to ask.
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let key = load_api_key(&cfg)?;

    match cli.command {
        Commands::Serve { bind } => {
            let cache = Arc::new(open_cache(&cfg, &key)?);
            cache.get_or_build(&StderrProgress).await?;
            let llm: Arc<dyn CompletionService> =
                Arc::from(create_completion_service(&cfg.llm, &key)?);
            let state = AppState::new(
                cache,
                llm,
                cfg.retrieval.top_k,
                SessionLimits::from(&cfg.server),
            );
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            server::run_server(&bind, state).await?;
        }
        Commands::Demo => {
            println!("{}", demo::key_presence_line(&key));
            let engine = open_engine(&cfg, &key).await?;
            let mut stdout = std::io::stdout();
            demo::run_demo(&engine, &cfg.demo.questions, &mut stdout).await?;
        }
        Commands::Index { force } => {
            if force && cfg.cache.enabled && cfg.cache.path.exists() {
                std::fs::remove_file(&cfg.cache.path)?;
            }
            let cache = open_cache(&cfg, &key)?;
            let (index, source) = cache.get_or_build(&StderrProgress).await?;
            let origin = match source {
                IndexSource::Disk => "loaded from cache",
                IndexSource::Memory | IndexSource::Built => "built",
            };
            println!(
                "index {}: {} documents, {} chunks, {} dims ({})",
                origin,
                index.metadata.documents,
                index.len(),
                index.metadata.dims,
                index.metadata.embedding_model
            );
        }
        Commands::Ask { question } => {
            let engine = open_engine(&cfg, &key).await?;
            let response = engine.query(&question).await?;
            println!("{}", response.answer);
            for s in &response.sources {
                eprintln!("  source: {}#{} (score {:.3})", s.path, s.chunk_index, s.score);
            }
        }
    }

    Ok(())
}

fn open_cache(cfg: &Config, key: &ApiKey) -> Result<IndexCache> {
    let loader = DirectoryLoader::new(&cfg.data)?;
    let embedder = create_embedder(&cfg.embedding, key)?;
    Ok(IndexCache::new(
        Arc::new(loader),
        Arc::from(embedder),
        cfg.chunking.clone(),
        cfg.embedding.batch_size,
        cfg.cache.enabled.then(|| cfg.cache.path.clone()),
    ))
}

async fn open_engine(cfg: &Config, key: &ApiKey) -> Result<QueryEngine> {
    let cache = open_cache(cfg, key)?;
    let (index, _) = cache.get_or_build(&StderrProgress).await?;
    let retriever = SemanticRetriever::new(index, cache.embedder());
    let llm = create_completion_service(&cfg.llm, key)?;
    Ok(QueryEngine::new(
        Arc::new(retriever),
        Arc::from(llm),
        cfg.retrieval.top_k,
    ))
}
