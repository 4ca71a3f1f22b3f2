//! Semantic search over the vector index.
//!
//! Pipeline for a query:
//!
//! 1. embed the query through the [`CachedEmbedder`]
//! 2. fetch `2 x limit` candidates from the [`VectorIndex`]
//! 3. drop candidates below `threshold`, then apply metadata filters
//! 4. optionally diversify: at most `max_per_document` results per document
//! 5. truncate to `limit` and assign 1-indexed ranks
//! 6. attach highlights and, optionally, a context window of neighbouring
//!    chunks
//!
//! ```ignore
//! let response = search.search("how do I rotate keys?", &SearchOptions::default()).await?;
//! for item in &response.results {
//!     println!("{} {:.2} {}", item.rank, item.score, item.document.chunk_id);
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::rag::embeddings::CachedEmbedder;
use crate::rag::index::VectorIndex;
use crate::rag::pool::WorkerPool;
use crate::types::{
    ChunkRecord, ContextWindow, Metadata, RagError, Result, ScoredRecord, SearchResponse,
    SearchResultItem,
};

// ============================================================================
// Search Options
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum cosine similarity
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Exact-match predicates on metadata. `documentId` and `source` are
    /// also accepted as keys.
    #[serde(default)]
    pub filters: Metadata,

    #[serde(default)]
    pub include_context: bool,

    /// Chunks taken on each side of a match when `include_context` is set
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    #[serde(default = "default_diversify")]
    pub diversify: bool,

    #[serde(default = "default_max_per_document")]
    pub max_per_document: usize,

    #[serde(default = "default_highlights")]
    pub include_highlights: bool,
}

fn default_limit() -> usize {
    5
}

fn default_threshold() -> f32 {
    0.5
}

fn default_context_window() -> usize {
    1
}

fn default_diversify() -> bool {
    true
}

fn default_max_per_document() -> usize {
    2
}

fn default_highlights() -> bool {
    true
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            threshold: default_threshold(),
            filters: Metadata::new(),
            include_context: false,
            context_window: default_context_window(),
            diversify: default_diversify(),
            max_per_document: default_max_per_document(),
            include_highlights: default_highlights(),
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_context(mut self, window: usize) -> Self {
        self.include_context = true;
        self.context_window = window;
        self
    }

    pub fn without_diversity(mut self) -> Self {
        self.diversify = false;
        self
    }
}

// ============================================================================
// Search Service
// ============================================================================

pub struct SearchService {
    embedder: Arc<CachedEmbedder>,
    index: Arc<VectorIndex>,
    ready: AtomicBool,
}

impl SearchService {
    pub fn new(embedder: Arc<CachedEmbedder>, index: Arc<VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            ready: AtomicBool::new(false),
        }
    }

    /// Warm up the embedding provider and make sure the vector schema exists.
    pub async fn init(&self) -> Result<()> {
        if self.embedder.dimension() != self.index.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: self.embedder.dimension(),
            });
        }
        self.embedder.warm_up().await?;
        self.index.ensure_schema().await?;
        self.ready.store(true, Ordering::Release);
        debug!(model = %self.embedder.model_name(), "search service ready");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn embedder(&self) -> &Arc<CachedEmbedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    #[instrument(skip(self, options), fields(limit = options.limit))]
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        if !self.is_ready() {
            return Err(RagError::NotInitialized(
                "search service used before init()".to_string(),
            ));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".to_string()));
        }
        if options.limit == 0 {
            return Ok(SearchResponse::default());
        }

        let embedding = self.embedder.embed(query).await?;
        let candidates = self
            .index
            .query(&embedding, options.limit.saturating_mul(2), options.threshold)
            .await?;

        let matching: Vec<ScoredRecord> = candidates
            .into_iter()
            .filter(|candidate| matches_filters(&candidate.record, &options.filters))
            .collect();
        let total_matches = matching.len();

        let mut selected = if options.diversify {
            diversify(matching, options.max_per_document)
        } else {
            matching
        };
        selected.truncate(options.limit);

        let mut neighbours: HashMap<String, Vec<ChunkRecord>> = HashMap::new();
        let mut results = Vec::with_capacity(selected.len());
        for (position, candidate) in selected.into_iter().enumerate() {
            let highlights = options
                .include_highlights
                .then(|| extract_highlights(&candidate.record.content, query));

            let context = if options.include_context {
                let document_id = candidate.record.document_id.clone();
                if !neighbours.contains_key(&document_id) {
                    let chunks = self.index.document_chunks(&document_id).await?;
                    neighbours.insert(document_id.clone(), chunks);
                }
                neighbours
                    .get(&document_id)
                    .map(|chunks| context_window(&candidate.record, chunks, options.context_window))
            } else {
                None
            };

            results.push(SearchResultItem {
                document: candidate.record,
                score: candidate.score,
                rank: position + 1,
                highlights,
                context,
            });
        }

        debug!(returned = results.len(), total_matches, "search complete");
        Ok(SearchResponse {
            results,
            total_matches,
        })
    }

    /// Run several searches through a bounded pool, keeping input order.
    pub async fn batch_search(
        self: &Arc<Self>,
        queries: Vec<String>,
        options: &SearchOptions,
        concurrency: usize,
    ) -> Result<Vec<Result<SearchResponse>>> {
        let pool = WorkerPool::new(concurrency);
        let options = Arc::new(options.clone());
        pool.run(queries, |query| {
            let service = Arc::clone(self);
            let options = Arc::clone(&options);
            async move { service.search(&query, &options).await }
        })
        .await
    }
}

// ============================================================================
// Ranking helpers
// ============================================================================

/// Keep at most `max_per_document` candidates per document, preserving the
/// incoming (score) order.
pub fn diversify(candidates: Vec<ScoredRecord>, max_per_document: usize) -> Vec<ScoredRecord> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    candidates
        .into_iter()
        .filter(|candidate| {
            let count = seen
                .entry(candidate.record.document_id.clone())
                .or_insert(0);
            *count += 1;
            *count <= max_per_document
        })
        .collect()
}

fn matches_filters(record: &ChunkRecord, filters: &Metadata) -> bool {
    filters.iter().all(|(key, expected)| match key.as_str() {
        "documentId" | "document_id" => expected.as_str() == Some(record.document_id.as_str()),
        _ => record.metadata.get(key) == Some(expected),
    })
}

/// Neighbouring chunks of `record` within `window` positions, by chunk index.
fn context_window(record: &ChunkRecord, chunks: &[ChunkRecord], window: usize) -> ContextWindow {
    let position = chunks
        .iter()
        .position(|chunk| chunk.chunk_id == record.chunk_id);

    let (before, after) = match position {
        Some(pos) => (
            chunks[pos.saturating_sub(window)..pos].to_vec(),
            chunks[(pos + 1).min(chunks.len())..(pos + 1 + window).min(chunks.len())].to_vec(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    let combined_text = before
        .iter()
        .chain(std::iter::once(record))
        .chain(after.iter())
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    ContextWindow {
        before,
        after,
        combined_text,
    }
}

/// Sentences of `content` that mention a query keyword (longer than 3
/// chars), between 20 and 200 chars long, at most 3.
pub fn extract_highlights(content: &str, query: &str) -> Vec<String> {
    let keywords: HashSet<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() > 3)
        .map(str::to_lowercase)
        .collect();
    if keywords.is_empty() {
        return Vec::new();
    }

    content
        .split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|sentence| (20..=200).contains(&sentence.chars().count()))
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            keywords.iter().any(|keyword| lower.contains(keyword.as_str()))
        })
        .take(3)
        .map(str::to_string)
        .collect()
}
