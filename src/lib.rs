//! # ragcore - Retrieval-Augmented Generation core
//!
//! Chunking, embedding caching, vector indexing, semantic search and
//! token-budgeted answer generation, assembled into one explicitly
//! constructed service.
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! ragcore = "0.1"
//! ```
//!
//! ### Basic Example
//!
//! ```rust,ignore
//! use ragcore::{Document, RagEngineBuilder, RagSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = RagSettings::load("ragcore.toml")?;
//!     ragcore::utils::logging::init_tracing(&settings.logging.level, settings.logging.json)?;
//!
//!     let engine = RagEngineBuilder::new(settings).build().await?;
//!     engine.init().await?;
//!
//!     engine.ingest(&Document::new("handbook", "Keys rotate every 90 days.")).await?;
//!     let response = engine.answer("How often do keys rotate?").await?;
//!     println!("{}", response.answer);
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama generation and embeddings (default) |
//! | `pgvector` | PostgreSQL/pgvector storage |
//! | `local-embeddings` | In-process fastembed embeddings |
//!
//! ## Modules
//!
//! - [`rag`] - Chunking, caching, indexing, search, orchestration, ingestion
//! - [`db`] - Vector storage engines
//! - [`llm`] - Generation providers
//! - [`types`] - Data model and error handling
//! - [`utils`] - Settings and logging

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Vector storage engines (in-memory, pgvector).
pub mod db;
/// Generation provider clients and abstractions.
pub mod llm;
/// Retrieval Augmented Generation (RAG) components.
pub mod rag;
/// Core types (documents, chunks, responses, errors).
pub mod types;
/// Settings and logging utilities.
pub mod utils;

// Re-export commonly used types
pub use db::{InMemoryVectorStorage, VectorStorage};
pub use llm::{GenerationConfig, GenerationProvider, Provider};
pub use rag::{
    AnswerOptions, CancelSource, CancelToken, EmbeddingProvider, IngestEvent, RagEngine,
    RagEngineBuilder, SearchOptions,
};
pub use types::{Document, RagError, RagResponse, Result, SearchResponse, TextChunk};
pub use utils::toml_config::{ConfigError, RagSettings, RagSettingsManager};
