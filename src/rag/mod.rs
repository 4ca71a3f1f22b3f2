//! Retrieval Augmented Generation (RAG) Pipeline
//!
//! This module turns raw documents into ranked, token-bounded evidence and
//! uses it to ground generated answers.
//!
//! # Module Structure
//!
//! - [`chunker`] - Overlapping, boundary-aware text chunking
//! - [`cache`] / [`dedup`] - Embedding cache and in-flight request sharing
//! - [`embeddings`] - Embedding provider trait and the cached embedder
//! - [`index`] - Vector persistence and ANN index recommendation
//! - [`search`] - Threshold, filters, diversification, context windows
//! - [`prompt`] - Token budgeting and prompt templates
//! - [`orchestrator`] - Retrieve, augment, generate
//! - [`ingest`] - Batch ingestion with progress events
//! - [`pool`] - Bounded worker pool and cancellation
//! - [`engine`] - The assembled service
//!
//! # RAG Pipeline
//!
//! 1. **Ingestion** - Documents are chunked and embedded
//! 2. **Storage** - Embeddings are upserted by chunk id
//! 3. **Retrieval** - The query is embedded and similar chunks retrieved
//! 4. **Augmentation** - Ranked chunks are packed into the prompt budget
//! 5. **Generation** - The model answers from the assembled prompt
//!
//! # Example
//!
//! ```ignore
//! use ragcore::rag::chunker::{ChunkingConfig, ChunkingEngine};
//!
//! let chunker = ChunkingEngine::new(ChunkingConfig::default())?;
//! let chunks = chunker.chunk(&text, "handbook");
//!
//! let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
//! let embeddings = embedder.embed_batch(&texts).await?;
//! for (chunk, embedding) in chunks.iter().zip(embeddings) {
//!     index.upsert(chunk, embedding, Metadata::new()).await?;
//! }
//!
//! let response = search.search("key rotation", &SearchOptions::default()).await?;
//! ```

pub mod cache;
pub mod chunker;
pub mod dedup;
pub mod embeddings;
pub mod engine;
pub mod index;
pub mod ingest;
pub mod orchestrator;
pub mod pool;
pub mod prompt;
pub mod search;

pub use cache::{CacheConfig, CacheStats, EmbeddingCache, LruEmbeddingCache, NoOpCache};
pub use chunker::{ChunkingConfig, ChunkingEngine, ChunkingStrategy};
pub use dedup::{DedupStats, RequestDeduplicator};
pub use embeddings::{CachedEmbedder, EmbeddingProvider};
pub use engine::{RagEngine, RagEngineBuilder};
pub use index::{recommend_index, ApplyOutcome, IndexConfig, IndexRecommendation, VectorIndex};
pub use ingest::{IngestConfig, IngestEvent, IngestSummary, IngestionPipeline, MemoryProbe};
pub use orchestrator::{
    AnswerOptions, HybridResponse, RagOrchestrator, RagStream, ReasonedAnswer, SourceOutcome,
};
pub use pool::{CancelSource, CancelToken, WorkerPool};
pub use search::{SearchOptions, SearchService};
