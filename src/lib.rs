//! # docchat
//!
//! Chat with the documents in a local folder.
//!
//! The folder is loaded once, split into chunks, and embedded through an
//! external embedding service. Each question is answered by retrieving the
//! most similar chunks and sending them, together with the conversation so
//! far, to an LLM completion service.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌─────────────┐
//! │   Loader   │──▶│ Chunk+Embed │──▶│ VectorIndex │ (memoized, cached on disk)
//! │  data/**   │   │             │   │             │
//! └────────────┘   └─────────────┘   └──────┬──────┘
//!                                           │ retrieve
//!                  ┌─────────────┐   ┌──────▼──────┐
//!                  │ ChatSession │──▶│ QueryEngine │──▶ CompletionService
//!                  │  (history)  │   │             │
//!                  └──────┬──────┘   └─────────────┘
//!                ┌────────┴────────┐
//!                ▼                 ▼
//!           ┌─────────┐       ┌─────────┐
//!           │ Web UI  │       │  Demo   │
//!           │ (serve) │       │ (demo)  │
//!           └─────────┘       └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=...
//! docchat index          # build the index for ./data
//! docchat serve          # chat in the browser
//! docchat demo           # ask the two scripted questions
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`credentials`] | API key lookup |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from PDF, DOCX, PPTX |
//! | [`loader`] | Document loading from the data directory |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding service abstraction |
//! | [`completion`] | Completion service abstraction |
//! | [`http`] | Shared request and retry helper |
//! | [`index`] | Vector index and retrieval |
//! | [`cache`] | Memoized index with change detection |
//! | [`query`] | Retrieval-augmented query engine |
//! | [`session`] | Conversation history |
//! | [`server`] | Web chat server |
//! | [`demo`] | Scripted demo |
//! | [`progress`] | Index build progress |

pub mod cache;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod demo;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod index;
pub mod loader;
pub mod models;
pub mod progress;
pub mod query;
pub mod server;
pub mod session;
