//! Live RAG Integration Tests
//!
//! These tests talk to a REAL Ollama server for both embeddings and
//! generation. They are **ignored by default** because they:
//! - Need a running Ollama instance with the models pulled
//! - Take several seconds per request on CPU
//!
//! # Running the tests
//!
//! ```bash
//! RAG_LIVE_TESTS=1 cargo test --test rag_live_tests -- --ignored
//!
//! # Different models
//! RAG_LIVE_TESTS=1 OLLAMA_MODEL=qwen2.5:3b OLLAMA_EMBED_MODEL=all-minilm OLLAMA_EMBED_DIM=384 \
//!     cargo test --test rag_live_tests -- --ignored --nocapture
//! ```
//!
//! # Environment Variables
//!
//! - `RAG_LIVE_TESTS=1` - Enable live tests (required)
//! - `OLLAMA_URL` - Server URL (default: http://localhost:11434)
//! - `OLLAMA_MODEL` - Generation model (default: llama3.2)
//! - `OLLAMA_EMBED_MODEL` - Embedding model (default: nomic-embed-text)
//! - `OLLAMA_EMBED_DIM` - Embedding dimension (default: 768)

#![cfg(feature = "ollama")]

use ragcore::rag::pool::CancelToken;
use ragcore::{Document, Provider, RagEngine, RagEngineBuilder, RagSettings};
use std::time::Instant;

// ============================================================================
// Test Configuration
// ============================================================================

fn should_run_live_tests() -> bool {
    std::env::var("RAG_LIVE_TESTS").is_ok()
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

macro_rules! skip_if_not_live {
    () => {
        if !should_run_live_tests() {
            eprintln!("Skipping live test. Set RAG_LIVE_TESTS=1 to run against Ollama.");
            return;
        }
    };
}

fn live_settings() -> RagSettings {
    let dimension: usize = env_or("OLLAMA_EMBED_DIM", "768")
        .parse()
        .expect("OLLAMA_EMBED_DIM must be a number");

    let mut settings = RagSettings::default();
    settings.index.dimension = dimension;
    settings.chunking.chunk_size = 400;
    settings.chunking.chunk_overlap = 50;
    settings.retrieval.threshold = 0.3;
    settings.provider = Some(Provider::Ollama {
        base_url: env_or("OLLAMA_URL", "http://localhost:11434"),
        model: env_or("OLLAMA_MODEL", "llama3.2"),
        embedding_model: env_or("OLLAMA_EMBED_MODEL", "nomic-embed-text"),
        dimension,
    });
    settings
}

async fn live_engine() -> RagEngine {
    let engine = RagEngineBuilder::new(live_settings())
        .build()
        .await
        .expect("engine should build");
    engine.init().await.expect("Ollama should be reachable");
    engine
}

fn knowledge_base() -> Vec<Document> {
    vec![
        Document::new(
            "rust-ownership",
            "In Rust every value has a single owner. When the owner goes out of scope \
             the value is dropped. Borrowing lets code use a value without taking ownership.",
        )
        .with_title("Ownership"),
        Document::new(
            "tokio",
            "Tokio is an asynchronous runtime for Rust. It provides a multi-threaded \
             scheduler, timers, and async networking primitives.",
        )
        .with_title("Tokio Runtime"),
        Document::new(
            "pgvector",
            "pgvector adds a vector column type to PostgreSQL together with IVFFlat and \
             HNSW indexes for approximate nearest neighbour search.",
        )
        .with_title("pgvector"),
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_live_ingest_and_search() {
    skip_if_not_live!();

    let engine = live_engine().await;
    let (_events, handle) = engine
        .ingest_batch(knowledge_base(), CancelToken::none())
        .unwrap();
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.failed, 0, "failures: {:?}", summary.failures);

    let start = Instant::now();
    let response = engine
        .search("Which index types does pgvector support?")
        .await
        .unwrap();
    println!("search took {:?}", start.elapsed());

    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].document.document_id, "pgvector");
}

#[tokio::test]
#[ignore]
async fn test_live_answer() {
    skip_if_not_live!();

    let engine = live_engine().await;
    for document in knowledge_base() {
        engine.ingest(&document).await.unwrap();
    }

    let response = engine
        .answer("What happens to a Rust value when its owner goes out of scope?")
        .await
        .unwrap();
    println!("answer: {}", response.answer);
    println!("metadata: {:?}", response.metadata);

    assert!(!response.answer.is_empty());
    assert!(response
        .sources
        .iter()
        .any(|source| source.document_id == "rust-ownership"));
}
