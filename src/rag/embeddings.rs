//! Embedding providers and the cached, deduplicated embedder used by the
//! rest of the pipeline.
//!
//! - [`EmbeddingProvider`] is the seam to the embedding model.
//! - [`CachedEmbedder`] puts the [`RequestDeduplicator`] and an
//!   [`EmbeddingCache`] in front of a provider.
//! - [`FastEmbedProvider`] (feature `local-embeddings`) runs ONNX models
//!   in-process through fastembed.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tracing::debug;

use crate::rag::cache::{CacheStats, EmbeddingCache};
use crate::rag::dedup::{DedupStats, RequestDeduplicator};
use crate::types::{RagError, Result};

// ============================================================================
// Provider Trait
// ============================================================================

/// A text embedding model producing fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts. The default embeds them one after another.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Load the model ahead of the first request.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Model load progress (0 to 100), for providers that download weights.
    fn load_progress(&self) -> Option<watch::Receiver<u8>> {
        None
    }
}

// ============================================================================
// Cached Embedder
// ============================================================================

/// Embedding provider wrapped with the cache and request deduplication.
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    dedup: RequestDeduplicator,
    max_parallel: usize,
}

impl CachedEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self {
            provider,
            dedup: RequestDeduplicator::new(cache),
            max_parallel: 8,
        }
    }

    /// Bound on concurrent provider calls made by `embed_batch`.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn warm_up(&self) -> Result<()> {
        self.provider.warm_up().await
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let provider = Arc::clone(&self.provider);
        self.dedup
            .get_or_compute(text, move |text| async move { provider.embed(&text).await })
            .await
    }

    /// Embed many texts, preserving input order. Cache hits cost nothing and
    /// every miss goes through deduplication.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let before = self.dedup.stats().computations;
        let pending: Vec<_> = texts.iter().map(|text| self.embed(text)).collect();
        let embeddings: Vec<Vec<f32>> = stream::iter(pending)
            .buffered(self.max_parallel)
            .try_collect()
            .await?;
        debug!(
            texts = texts.len(),
            computed = self.dedup.stats().computations - before,
            "embedded batch"
        );
        Ok(embeddings)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.dedup.cache().stats()
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup.stats()
    }

    pub fn clear(&self) -> Result<()> {
        self.dedup.cache().clear()
    }

    /// Drop expired cache entries, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.dedup.cache().cleanup_expired()
    }
}

// ============================================================================
// fastembed Provider
// ============================================================================

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedProvider;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use parking_lot::Mutex;

    /// In-process embeddings via fastembed (BGE small, 384 dimensions).
    pub struct FastEmbedProvider {
        model: Arc<Mutex<Option<TextEmbedding>>>,
        progress: watch::Sender<u8>,
    }

    impl FastEmbedProvider {
        pub fn new() -> Self {
            let (progress, _) = watch::channel(0);
            Self {
                model: Arc::new(Mutex::new(None)),
                progress,
            }
        }

        fn load(slot: &mut Option<TextEmbedding>) -> Result<&mut TextEmbedding> {
            if slot.is_none() {
                let model = TextEmbedding::try_new(
                    InitOptions::new(EmbeddingModel::BGESmallENV15)
                        .with_show_download_progress(true),
                )
                .map_err(|e| RagError::Embedding(e.to_string()))?;
                *slot = Some(model);
            }
            slot.as_mut()
                .ok_or_else(|| RagError::Embedding("model failed to load".to_string()))
        }

        async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            tokio::task::spawn_blocking(move || {
                let mut slot = model.lock();
                let model = Self::load(&mut slot)?;
                model
                    .embed(texts, None)
                    .map_err(|e| RagError::Embedding(e.to_string()))
            })
            .await
            .map_err(|e| RagError::Embedding(format!("embedding task panicked: {}", e)))?
        }
    }

    impl Default for FastEmbedProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.run(vec![text.to_string()])
                .await?
                .pop()
                .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.run(texts.to_vec()).await
        }

        fn dimension(&self) -> usize {
            384
        }

        fn model_name(&self) -> &str {
            "BAAI/bge-small-en-v1.5"
        }

        async fn warm_up(&self) -> Result<()> {
            let model = Arc::clone(&self.model);
            tokio::task::spawn_blocking(move || Self::load(&mut model.lock()).map(|_| ()))
                .await
                .map_err(|e| RagError::Embedding(format!("model load panicked: {}", e)))??;
            self.progress.send_replace(100);
            Ok(())
        }

        fn load_progress(&self) -> Option<watch::Receiver<u8>> {
            Some(self.progress.subscribe())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::cache::{CacheConfig, LruEmbeddingCache};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn embedder() -> (Arc<CountingProvider>, CachedEmbedder) {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(LruEmbeddingCache::new(CacheConfig::default()));
        let embedder = CachedEmbedder::new(provider.clone(), cache);
        (provider, embedder)
    }

    #[tokio::test]
    async fn test_embed_uses_cache() {
        let (provider, embedder) = embedder();
        embedder.embed("hello").await.unwrap();
        embedder.embed("hello").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order_and_skips_duplicates() {
        let (provider, embedder) = embedder();
        embedder.embed("a").await.unwrap();

        let texts: Vec<String> = ["a", "bb", "ccc", "bb"].iter().map(|s| s.to_string()).collect();
        let embeddings = embedder.embed_batch(&texts).await.unwrap();

        let lengths: Vec<f32> = embeddings.iter().map(|e| e[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 2.0]);
        // "a" was cached, "bb" computed once
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_clear_forces_recompute() {
        let (provider, embedder) = embedder();
        embedder.embed("x").await.unwrap();
        embedder.clear().unwrap();
        embedder.embed("x").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
