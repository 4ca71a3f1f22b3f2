//! Document ingestion: chunk, embed, and store.
//!
//! Single documents go through [`IngestionPipeline::ingest_document`].
//! Batches are processed in groups of `batch_size` with at most
//! `concurrency` documents in flight. Progress is reported as
//! [`IngestEvent`]s on an unbounded channel, in completion order.
//!
//! Ingests of the same document id are serialized, and each document's
//! chunks are swapped in with one [`VectorIndex::replace_document`] call.
//!
//! Between documents the pipeline consults a [`MemoryProbe`]. Above the
//! high-water mark it pauses, releases expired cache entries, and resumes
//! once usage drops back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::rag::chunker::ChunkingEngine;
use crate::rag::embeddings::CachedEmbedder;
use crate::rag::index::{ApplyOutcome, VectorIndex};
use crate::rag::pool::CancelToken;
use crate::types::{Document, Metadata, RagError, Result};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Documents processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Documents per group; cancellation is checked between groups
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between groups
    #[serde(default)]
    pub batch_delay_ms: u64,

    /// Memory usage ratio (0.0 - 1.0) above which ingestion pauses
    #[serde(default = "default_memory_high_water")]
    pub memory_high_water: f64,

    #[serde(default = "default_memory_poll_ms")]
    pub memory_poll_ms: u64,

    /// Re-evaluate the ANN index after a batch
    #[serde(default = "default_auto_tune_index")]
    pub auto_tune_index: bool,
}

fn default_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    32
}

fn default_memory_high_water() -> f64 {
    0.8
}

fn default_memory_poll_ms() -> u64 {
    250
}

fn default_auto_tune_index() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            batch_delay_ms: 0,
            memory_high_water: default_memory_high_water(),
            memory_poll_ms: default_memory_poll_ms(),
            auto_tune_index: default_auto_tune_index(),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(RagError::Config("ingest.concurrency must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(RagError::Config("ingest.batch_size must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.memory_high_water) || self.memory_high_water == 0.0 {
            return Err(RagError::Config(
                "ingest.memory_high_water must be in (0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Memory pressure
// ============================================================================

/// Reports current memory usage as a ratio in `0.0..=1.0`.
pub trait MemoryProbe: Send + Sync {
    fn usage_ratio(&self) -> f64;
}

/// Always reports no pressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemoryPressure;

impl MemoryProbe for NoMemoryPressure {
    fn usage_ratio(&self) -> f64 {
        0.0
    }
}

/// System-wide usage from `/proc/meminfo` (`1 - MemAvailable / MemTotal`).
/// Reports 0.0 where the file is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMeminfoProbe;

impl ProcMeminfoProbe {
    fn parse(meminfo: &str) -> Option<f64> {
        let field = |name: &str| -> Option<f64> {
            meminfo
                .lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|value| value.parse::<f64>().ok())
        };
        let total = field("MemTotal:")?;
        let available = field("MemAvailable:")?;
        if total <= 0.0 {
            return None;
        }
        Some((1.0 - available / total).clamp(0.0, 1.0))
    }
}

impl MemoryProbe for ProcMeminfoProbe {
    fn usage_ratio(&self) -> f64 {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|contents| Self::parse(&contents))
            .unwrap_or(0.0)
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
    /// (document id, error message)
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    Started {
        total: usize,
    },
    DocumentCompleted {
        document_id: String,
        chunks: usize,
        completed: usize,
        total: usize,
    },
    DocumentFailed {
        document_id: String,
        error: String,
        completed: usize,
        total: usize,
    },
    Paused {
        usage_ratio: f64,
    },
    Resumed,
    Cancelled {
        completed: usize,
    },
    Finished {
        summary: IngestSummary,
    },
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct IngestionPipeline {
    chunker: ChunkingEngine,
    embedder: Arc<CachedEmbedder>,
    index: Arc<VectorIndex>,
    config: IngestConfig,
    memory: Arc<dyn MemoryProbe>,
    document_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(
        chunker: ChunkingEngine,
        embedder: Arc<CachedEmbedder>,
        index: Arc<VectorIndex>,
        config: IngestConfig,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            config,
            memory: Arc::new(NoMemoryPressure),
            document_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = probe;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn chunker(&self) -> &ChunkingEngine {
        &self.chunker
    }

    /// Chunk, embed and store one document, replacing any chunks stored
    /// under the same id. Returns the number of chunks written.
    #[instrument(skip(self, document), fields(document_id = %document.id))]
    pub async fn ingest_document(&self, document: &Document) -> Result<usize> {
        if document.id.trim().is_empty() {
            return Err(RagError::InvalidInput("document id must not be empty".to_string()));
        }

        let lock = self.document_lock(&document.id);
        let outcome = {
            let _guard = lock.lock().await;
            self.write_document(document).await
        };
        self.release_document_lock(&document.id, lock);
        outcome
    }

    async fn write_document(&self, document: &Document) -> Result<usize> {
        let chunks = self.chunker.chunk_document(document);
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let count = chunks.len();
        let metadata = chunk_metadata(document);
        let removed = self
            .index
            .replace_document(&document.id, chunks.into_iter().zip(embeddings).collect(), &metadata)
            .await?;
        if removed > 0 {
            debug!(removed, "replaced previous chunks");
        }

        info!(chunks = count, "document ingested");
        Ok(count)
    }

    fn document_lock(&self, document_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.document_locks.lock();
        Arc::clone(locks.entry(document_id.to_string()).or_default())
    }

    /// Forget the lock once no other ingest of the document holds or awaits it.
    fn release_document_lock(&self, document_id: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.document_locks.lock();
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(document_id);
        }
    }

    /// Ingest `documents` with bounded concurrency, reporting progress on
    /// `events`. A failed document is reported and counted, not fatal.
    #[instrument(skip_all, fields(total = documents.len()))]
    pub async fn ingest_batch(
        self: &Arc<Self>,
        documents: Vec<Document>,
        cancel: CancelToken,
        events: mpsc::UnboundedSender<IngestEvent>,
    ) -> Result<IngestSummary> {
        let started = Instant::now();
        let total = documents.len();
        let _ = events.send(IngestEvent::Started { total });

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut summary = IngestSummary {
            total,
            ..IngestSummary::default()
        };

        let mut remaining = documents.into_iter().peekable();
        let mut first_group = true;
        while remaining.peek().is_some() {
            if !first_group && self.config.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
            first_group = false;

            if cancel.is_cancelled() {
                summary.cancelled = true;
                let _ = events.send(IngestEvent::Cancelled {
                    completed: completed.load(Ordering::SeqCst),
                });
                break;
            }

            let group: Vec<Document> = remaining.by_ref().take(self.config.batch_size.max(1)).collect();
            let mut set = JoinSet::new();

            for document in group {
                self.wait_for_memory(&cancel, &events).await;

                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| RagError::Cancelled)?;
                let pipeline = Arc::clone(self);
                let completed = Arc::clone(&completed);
                let events = events.clone();

                set.spawn(async move {
                    let outcome = pipeline.ingest_document(&document).await;
                    drop(permit);

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    let event = match &outcome {
                        Ok(chunks) => IngestEvent::DocumentCompleted {
                            document_id: document.id.clone(),
                            chunks: *chunks,
                            completed: done,
                            total,
                        },
                        Err(e) => IngestEvent::DocumentFailed {
                            document_id: document.id.clone(),
                            error: e.to_string(),
                            completed: done,
                            total,
                        },
                    };
                    let _ = events.send(event);
                    (document.id, outcome)
                });
            }

            while let Some(joined) = set.join_next().await {
                let (document_id, outcome) =
                    joined.map_err(|e| RagError::Internal(format!("ingest task failed: {}", e)))?;
                match outcome {
                    Ok(chunks) => {
                        summary.succeeded += 1;
                        summary.chunks += chunks;
                    }
                    Err(e) => {
                        warn!(document_id = %document_id, error = %e, "document ingestion failed");
                        summary.failed += 1;
                        summary.failures.push((document_id, e.to_string()));
                    }
                }
            }
        }

        if self.config.auto_tune_index && summary.succeeded > 0 {
            match self.index.auto_tune().await {
                Ok(ApplyOutcome::Applied { previous, current }) => {
                    info!(previous = %previous, current = %current, "vector index retuned");
                }
                Ok(ApplyOutcome::Unchanged) => {}
                Err(e) => warn!(error = %e, "index auto-tune failed"),
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            chunks = summary.chunks,
            cancelled = summary.cancelled,
            "batch ingestion finished"
        );
        let _ = events.send(IngestEvent::Finished {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    /// Block while memory usage is above the high-water mark.
    async fn wait_for_memory(
        &self,
        cancel: &CancelToken,
        events: &mpsc::UnboundedSender<IngestEvent>,
    ) {
        let mut usage = self.memory.usage_ratio();
        if usage <= self.config.memory_high_water {
            return;
        }

        warn!(usage, high_water = self.config.memory_high_water, "memory pressure, pausing ingestion");
        let _ = events.send(IngestEvent::Paused { usage_ratio: usage });

        let poll = Duration::from_millis(self.config.memory_poll_ms.max(1));
        while usage > self.config.memory_high_water && !cancel.is_cancelled() {
            let released = self.embedder.cleanup_expired();
            if released > 0 {
                debug!(released, "released expired cache entries");
            }
            tokio::time::sleep(poll).await;
            usage = self.memory.usage_ratio();
        }

        info!(usage, "resuming ingestion");
        let _ = events.send(IngestEvent::Resumed);
    }
}

/// Metadata stored with every chunk of `document`.
fn chunk_metadata(document: &Document) -> Metadata {
    let mut metadata = document.metadata.clone();
    if let Some(title) = &document.title {
        metadata.insert("title".to_string(), serde_json::Value::String(title.clone()));
    }
    if let Some(source) = &document.source {
        metadata.insert("source".to_string(), serde_json::Value::String(source.clone()));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::vectorstore::{InMemoryVectorStorage, IndexKind, StorageDialect, VectorStorage};
    use crate::rag::cache::{CacheConfig, LruEmbeddingCache};
    use crate::rag::chunker::{ChunkingConfig, ChunkingStrategy};
    use crate::rag::embeddings::EmbeddingProvider;
    use crate::rag::index::IndexConfig;
    use crate::rag::pool::CancelSource;
    use crate::types::{ChunkRecord, ScoredRecord, StoredVector};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("poison") {
                return Err(RagError::Embedding("model rejected input".to_string()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "length"
        }
    }

    /// Replays a fixed sequence of readings, then reports the last one.
    struct ScriptedProbe {
        readings: Mutex<VecDeque<f64>>,
    }

    impl MemoryProbe for ScriptedProbe {
        fn usage_ratio(&self) -> f64 {
            let mut readings = self.readings.lock();
            if readings.len() > 1 {
                readings.pop_front().unwrap_or(0.0)
            } else {
                readings.front().copied().unwrap_or(0.0)
            }
        }
    }

    fn pipeline(config: IngestConfig) -> (Arc<IngestionPipeline>, Arc<InMemoryVectorStorage>) {
        pipeline_with_probe(config, Arc::new(NoMemoryPressure))
    }

    fn pipeline_with_probe(
        config: IngestConfig,
        probe: Arc<dyn MemoryProbe>,
    ) -> (Arc<IngestionPipeline>, Arc<InMemoryVectorStorage>) {
        let storage = Arc::new(InMemoryVectorStorage::new());
        let pipeline = pipeline_over(storage.clone(), config, probe);
        (pipeline, storage)
    }

    fn pipeline_over(
        storage: Arc<dyn VectorStorage>,
        config: IngestConfig,
        probe: Arc<dyn MemoryProbe>,
    ) -> Arc<IngestionPipeline> {
        let index = Arc::new(
            VectorIndex::new(
                storage,
                IndexConfig {
                    dimension: 2,
                    ..IndexConfig::default()
                },
            )
            .unwrap(),
        );
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(LengthEmbedder),
            Arc::new(LruEmbeddingCache::new(CacheConfig::default())),
        ));
        let chunker = ChunkingEngine::new(ChunkingConfig {
            strategy: ChunkingStrategy::FixedSize,
            chunk_size: 10,
            chunk_overlap: 0,
            min_chunk_size: 1,
            ..ChunkingConfig::default()
        })
        .unwrap();
        Arc::new(IngestionPipeline::new(chunker, embedder, index, config).with_memory_probe(probe))
    }

    /// In-memory storage that yields to the scheduler before every call and
    /// keeps the non-atomic default `replace_document`.
    struct YieldingStorage {
        inner: InMemoryVectorStorage,
    }

    #[async_trait]
    impl VectorStorage for YieldingStorage {
        fn provider_name(&self) -> &'static str {
            "yielding"
        }

        fn dialect(&self) -> StorageDialect {
            StorageDialect::InMemory
        }

        fn supports(&self, kind: IndexKind) -> bool {
            self.inner.supports(kind)
        }

        async fn execute(&self, ddl: &str) -> Result<()> {
            self.inner.execute(ddl).await
        }

        async fn upsert(&self, row: &StoredVector) -> Result<()> {
            tokio::task::yield_now().await;
            self.inner.upsert(row).await
        }

        async fn similarity_query(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredRecord>> {
            self.inner.similarity_query(embedding, limit).await
        }

        async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
            self.inner.chunks_for_document(document_id).await
        }

        async fn delete_document(&self, document_id: &str) -> Result<usize> {
            tokio::task::yield_now().await;
            self.inner.delete_document(document_id).await
        }

        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<IngestEvent>) -> Vec<IngestEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_ingest_document_stores_chunks_with_metadata() {
        let (pipeline, storage) = pipeline(IngestConfig::default());
        let document = Document::new("doc", "aaaaaaaaaabbbbbbbbbbcccc")
            .with_title("Letters")
            .with_source("letters.txt");

        let chunks = pipeline.ingest_document(&document).await.unwrap();
        assert_eq!(chunks, 3);

        let stored = storage.chunks_for_document("doc").await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].title.as_deref(), Some("Letters"));
        assert_eq!(stored[2].metadata["source"], "letters.txt");
    }

    #[tokio::test]
    async fn test_reingest_replaces_previous_chunks() {
        let (pipeline, storage) = pipeline(IngestConfig::default());
        pipeline
            .ingest_document(&Document::new("doc", "x".repeat(30)))
            .await
            .unwrap();
        pipeline
            .ingest_document(&Document::new("doc", "y".repeat(10)))
            .await
            .unwrap();

        let stored = storage.chunks_for_document("doc").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "y".repeat(10));
    }

    #[tokio::test]
    async fn test_concurrent_reingest_never_mixes_versions() {
        let storage = Arc::new(YieldingStorage {
            inner: InMemoryVectorStorage::new(),
        });
        let pipeline = pipeline_over(storage.clone(), IngestConfig::default(), Arc::new(NoMemoryPressure));
        let long = Document::new("doc", "x".repeat(100));
        let short = Document::new("doc", "y".repeat(20));

        for _ in 0..20 {
            let (a, b) = tokio::join!(
                pipeline.ingest_document(&long),
                pipeline.ingest_document(&short)
            );
            a.unwrap();
            b.unwrap();

            let stored = storage.chunks_for_document("doc").await.unwrap();
            let all_long = stored.len() == 10 && stored.iter().all(|c| c.content.starts_with('x'));
            let all_short = stored.len() == 2 && stored.iter().all(|c| c.content.starts_with('y'));
            assert!(all_long || all_short, "mixed versions: {} chunks", stored.len());
        }
        assert!(pipeline.document_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_existing_chunks() {
        let (pipeline, storage) = pipeline(IngestConfig::default());
        pipeline
            .ingest_document(&Document::new("doc", "fine text"))
            .await
            .unwrap();
        let err = pipeline
            .ingest_document(&Document::new("doc", "poison"))
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::Embedding(_)));
        assert_eq!(storage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_reports_progress_and_failures() {
        let (pipeline, _) = pipeline(IngestConfig {
            concurrency: 2,
            batch_size: 2,
            ..IngestConfig::default()
        });
        let documents = vec![
            Document::new("a", "alpha text"),
            Document::new("b", "poison pill"),
            Document::new("c", "gamma text"),
        ];
        let (tx, rx) = mpsc::unbounded_channel();

        let summary = pipeline
            .ingest_batch(documents, CancelToken::none(), tx)
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].0, "b");

        let events = drain(rx);
        assert!(matches!(events.first(), Some(IngestEvent::Started { total: 3 })));
        assert!(matches!(events.last(), Some(IngestEvent::Finished { .. })));

        let mut completed: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                IngestEvent::DocumentCompleted { completed, .. }
                | IngestEvent::DocumentFailed { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect();
        completed.sort_unstable();
        assert_eq!(completed, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_batch_runs_on_spawned_task() {
        let (pipeline, storage) = pipeline(IngestConfig {
            concurrency: 2,
            batch_size: 2,
            ..IngestConfig::default()
        });
        let documents = vec![
            Document::new("a", "alpha text"),
            Document::new("a", "alpha text, second copy"),
            Document::new("b", "beta text"),
        ];
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.ingest_batch(documents, CancelToken::none(), tx).await }
        });
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(storage.chunks_for_document("b").await.unwrap().len(), 1);
        // Both copies of "a" land whole, one after the other
        let versions: Vec<usize> = ["alpha text", "alpha text, second copy"]
            .iter()
            .map(|text| pipeline.chunker().chunk_document(&Document::new("a", *text)).len())
            .collect();
        let a = storage.chunks_for_document("a").await.unwrap();
        assert!(versions.contains(&a.len()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_ingests_nothing() {
        let (pipeline, storage) = pipeline(IngestConfig::default());
        let source = CancelSource::new();
        source.cancel();
        let (tx, rx) = mpsc::unbounded_channel();

        let summary = pipeline
            .ingest_batch(vec![Document::new("a", "alpha")], source.token(), tx)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(storage.count().await.unwrap(), 0);
        assert!(drain(rx)
            .iter()
            .any(|event| matches!(event, IngestEvent::Cancelled { completed: 0 })));
    }

    #[tokio::test]
    async fn test_memory_pressure_pauses_then_resumes() {
        let probe = Arc::new(ScriptedProbe {
            readings: Mutex::new(VecDeque::from(vec![0.95, 0.9, 0.5])),
        });
        let (pipeline, _) = pipeline_with_probe(
            IngestConfig {
                memory_poll_ms: 1,
                ..IngestConfig::default()
            },
            probe,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let summary = pipeline
            .ingest_batch(vec![Document::new("a", "alpha")], CancelToken::none(), tx)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);

        let events = drain(rx);
        let paused = events
            .iter()
            .position(|e| matches!(e, IngestEvent::Paused { .. }))
            .unwrap();
        let resumed = events
            .iter()
            .position(|e| matches!(e, IngestEvent::Resumed))
            .unwrap();
        assert!(paused < resumed);
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    250 kB\n";
        let ratio = ProcMeminfoProbe::parse(meminfo).unwrap();
        assert!((ratio - 0.75).abs() < 1e-9);
        assert!(ProcMeminfoProbe::parse("garbage").is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(IngestConfig::default().validate().is_ok());
        let bad = IngestConfig {
            concurrency: 0,
            ..IngestConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
