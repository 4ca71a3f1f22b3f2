//! The assembled RAG service.
//!
//! [`RagEngine`] owns one instance of every component and hands them out as
//! `Arc`s. Build it with [`RagEngineBuilder`], call [`RagEngine::init`]
//! before use and [`RagEngine::shutdown`] when done. Shutdown closes the
//! storage connection for good; build a new engine to start again.
//!
//! ```rust,ignore
//! use ragcore::{RagEngineBuilder, RagSettings};
//!
//! let engine = RagEngineBuilder::new(RagSettings::load("ragcore.toml")?)
//!     .build()
//!     .await?;
//! engine.init().await?;
//!
//! engine.ingest(&Document::new("handbook", text)).await?;
//! let response = engine.answer("How often are keys rotated?").await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::db::vectorstore::{InMemoryVectorStorage, VectorStorage};
use crate::llm::client::GenerationProvider;
use crate::rag::cache::{CacheStats, EmbeddingCache, LruEmbeddingCache, NoOpCache};
use crate::rag::chunker::ChunkingEngine;
use crate::rag::embeddings::{CachedEmbedder, EmbeddingProvider};
use crate::rag::index::VectorIndex;
use crate::rag::ingest::{IngestEvent, IngestSummary, IngestionPipeline, MemoryProbe};
use crate::rag::orchestrator::{AnswerOptions, HybridResponse, RagOrchestrator};
use crate::rag::pool::CancelToken;
use crate::rag::search::{SearchOptions, SearchService};
use crate::types::{Document, RagError, RagResponse, Result, SearchResponse};
use crate::utils::toml_config::{RagSettings, StorageBackend};

/// Builder for [`RagEngine`]. Anything not injected is created from the
/// settings.
pub struct RagEngineBuilder {
    settings: RagSettings,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerationProvider>>,
    storage: Option<Arc<dyn VectorStorage>>,
    cache: Option<Arc<dyn EmbeddingCache>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
}

impl RagEngineBuilder {
    pub fn new(settings: RagSettings) -> Self {
        Self {
            settings,
            embedding_provider: None,
            generator: None,
            storage: None,
            cache: None,
            memory_probe: None,
        }
    }

    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn VectorStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    /// Wire the components together. Connects to storage but does not
    /// touch the schema or the models; that happens in `init`.
    pub async fn build(self) -> Result<RagEngine> {
        let settings = self.settings;
        settings.validate()?;

        let embedding_provider = match self.embedding_provider {
            Some(provider) => provider,
            None => default_embedding_provider(&settings)?,
        };
        let generator = match self.generator {
            Some(generator) => Some(generator),
            None => settings
                .provider
                .as_ref()
                .map(|provider| provider.create_generator())
                .transpose()?,
        };
        let storage = match self.storage {
            Some(storage) => storage,
            None => default_storage(&settings).await?,
        };
        let cache = self.cache.unwrap_or_else(|| {
            if settings.cache.enabled {
                Arc::new(LruEmbeddingCache::new(settings.cache.clone())) as Arc<dyn EmbeddingCache>
            } else {
                Arc::new(NoOpCache::new())
            }
        });

        let embedder = Arc::new(CachedEmbedder::new(embedding_provider, cache));
        let index = Arc::new(VectorIndex::new(storage, settings.index.clone())?);
        let search = Arc::new(SearchService::new(Arc::clone(&embedder), Arc::clone(&index)));
        let orchestrator = generator.map(|generator| {
            Arc::new(RagOrchestrator::new(
                Arc::clone(&search),
                generator,
                settings.generation.clone(),
            ))
        });

        let mut ingestion = IngestionPipeline::new(
            ChunkingEngine::new(settings.chunking.clone())?,
            Arc::clone(&embedder),
            Arc::clone(&index),
            settings.ingest.clone(),
        );
        if let Some(probe) = self.memory_probe {
            ingestion = ingestion.with_memory_probe(probe);
        }

        Ok(RagEngine {
            settings: Arc::new(settings),
            embedder,
            index,
            search,
            orchestrator,
            ingestion: Arc::new(ingestion),
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }
}

fn default_embedding_provider(settings: &RagSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    if let Some(provider) = &settings.provider {
        return provider.create_embedder();
    }

    #[cfg(feature = "local-embeddings")]
    {
        Ok(Arc::new(crate::rag::embeddings::FastEmbedProvider::new()))
    }

    #[cfg(not(feature = "local-embeddings"))]
    {
        Err(RagError::Config(
            "no embedding provider configured; set [provider] or inject one".to_string(),
        ))
    }
}

async fn default_storage(settings: &RagSettings) -> Result<Arc<dyn VectorStorage>> {
    match settings.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryVectorStorage::new())),
        #[cfg(feature = "pgvector")]
        StorageBackend::Pgvector => {
            let url = settings.database_url()?;
            let storage =
                crate::db::pgvector::PgVectorStorage::connect(&url, settings.index.table.clone())
                    .await?;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "pgvector"))]
        StorageBackend::Pgvector => Err(RagError::Config(
            "pgvector storage requires the 'pgvector' feature".to_string(),
        )),
    }
}

/// One explicitly constructed RAG service.
pub struct RagEngine {
    settings: Arc<RagSettings>,
    embedder: Arc<CachedEmbedder>,
    index: Arc<VectorIndex>,
    search: Arc<SearchService>,
    orchestrator: Option<Arc<RagOrchestrator>>,
    ingestion: Arc<IngestionPipeline>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
}

impl RagEngine {
    /// Warm up the embedding model and create the vector schema.
    /// Calling it again is a no-op. Fails once the engine has been shut down.
    pub async fn init(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RagError::NotInitialized(
                "RAG engine was shut down; build a new one".to_string(),
            ));
        }
        if self.is_initialized() {
            return Ok(());
        }
        self.search.init().await?;
        self.initialized.store(true, Ordering::Release);
        info!(
            model = %self.embedder.model_name(),
            storage = self.index.storage().provider_name(),
            generation = self.orchestrator.is_some(),
            "RAG engine initialized"
        );
        Ok(())
    }

    /// Release the storage connection and drop cached embeddings.
    pub async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
        self.search.shutdown();
        self.embedder.clear()?;
        self.index.storage().close().await?;
        info!("RAG engine shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(RagError::NotInitialized(
                "RAG engine used before init()".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    pub fn settings(&self) -> &Arc<RagSettings> {
        &self.settings
    }

    pub fn embedder(&self) -> &Arc<CachedEmbedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn search_service(&self) -> &Arc<SearchService> {
        &self.search
    }

    pub fn ingestion(&self) -> &Arc<IngestionPipeline> {
        &self.ingestion
    }

    /// The orchestrator, if a generation provider was configured
    pub fn orchestrator(&self) -> Result<&Arc<RagOrchestrator>> {
        self.orchestrator.as_ref().ok_or_else(|| {
            RagError::NotInitialized("no generation provider configured".to_string())
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.embedder.cache_stats()
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub async fn ingest(&self, document: &Document) -> Result<usize> {
        self.ensure_initialized()?;
        self.ingestion.ingest_document(document).await
    }

    /// Start a batch ingestion in the background. Events arrive on the
    /// returned receiver; the handle resolves to the summary.
    pub fn ingest_batch(
        &self,
        documents: Vec<Document>,
        cancel: CancelToken,
    ) -> Result<(
        mpsc::UnboundedReceiver<IngestEvent>,
        JoinHandle<Result<IngestSummary>>,
    )> {
        self.ensure_initialized()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Arc::clone(&self.ingestion);
        let handle =
            tokio::spawn(async move { pipeline.ingest_batch(documents, cancel, tx).await });
        Ok((rx, handle))
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        self.ensure_initialized()?;
        self.index.delete_document(document_id).await
    }

    /// Search with the configured retrieval defaults
    pub async fn search(&self, query: &str) -> Result<SearchResponse> {
        let options = self.settings.retrieval.search_options();
        self.search_with(query, &options).await
    }

    pub async fn search_with(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        self.ensure_initialized()?;
        self.search.search(query, options).await
    }

    pub async fn batch_search(&self, queries: Vec<String>) -> Result<Vec<Result<SearchResponse>>> {
        self.ensure_initialized()?;
        let options = self.settings.retrieval.search_options();
        self.search
            .batch_search(queries, &options, self.settings.retrieval.search_concurrency)
            .await
    }

    /// Answer with the configured retrieval defaults
    pub async fn answer(&self, query: &str) -> Result<RagResponse> {
        let options = self.settings.retrieval.answer_options();
        self.answer_with(query, &options).await
    }

    pub async fn answer_with(&self, query: &str, options: &AnswerOptions) -> Result<RagResponse> {
        self.ensure_initialized()?;
        self.orchestrator()?.answer(query, options).await
    }

    pub async fn hybrid_answer(&self, query: &str, options: &AnswerOptions) -> Result<HybridResponse> {
        self.ensure_initialized()?;
        self.orchestrator()?.hybrid_answer(query, options).await
    }
}
