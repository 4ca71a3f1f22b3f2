//! Vector Storage Abstraction Layer
//!
//! The [`VectorStorage`] trait is the seam between the RAG pipeline and the
//! engine that actually stores chunk vectors, evaluates cosine similarity and
//! runs index DDL.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     VectorStorage Trait                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ execute │ upsert │ replace_document │ similarity_query │ …    │
//! └───────────────────────────────────────────────────────────────┘
//!             ▲                                   ▲
//!             │                                   │
//!     ┌───────┴────────┐                  ┌───────┴───────┐
//!     │    InMemory    │                  │   pgvector    │
//!     │ (exact scan)   │                  │ (ivfflat/hnsw)│
//!     └────────────────┘                  └───────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ragcore::db::vectorstore::{InMemoryVectorStorage, VectorStorage};
//!
//! let storage = InMemoryVectorStorage::new();
//! storage.upsert(&row).await?;
//! let rows = storage.similarity_query(&query_embedding, 10).await?;
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{ChunkRecord, RagError, Result, ScoredRecord, StoredVector};

// ============================================================================
// Index and Dialect Types
// ============================================================================

/// Approximate-nearest-neighbour index families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// No index, exact scan
    None,
    /// Inverted file with flat lists (clustering)
    IvfFlat,
    /// Hierarchical navigable small world graph
    Hnsw,
}

impl FromStr for IndexKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "exact" | "flat" => Ok(Self::None),
            "ivfflat" | "ivf_flat" | "ivf" => Ok(Self::IvfFlat),
            "hnsw" => Ok(Self::Hnsw),
            _ => Err(RagError::UnsupportedIndexType(format!(
                "{}. Use: none, ivfflat, hnsw",
                s
            ))),
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::IvfFlat => "ivfflat",
            Self::Hnsw => "hnsw",
        };
        write!(f, "{}", name)
    }
}

/// SQL dialect a storage engine understands for DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageDialect {
    /// PostgreSQL with the pgvector extension
    Postgres,
    /// Statements are recorded but not interpreted
    InMemory,
}

// ============================================================================
// Storage Trait
// ============================================================================

/// Storage engine holding chunk vectors.
///
/// Scores returned by `similarity_query` are cosine similarities, highest
/// first.
#[async_trait]
pub trait VectorStorage: Send + Sync {
    /// Returns the name of this storage provider.
    fn provider_name(&self) -> &'static str;

    fn dialect(&self) -> StorageDialect;

    /// Whether the engine can build an index of this kind.
    fn supports(&self, kind: IndexKind) -> bool;

    /// Execute a DDL statement.
    async fn execute(&self, ddl: &str) -> Result<()>;

    /// Insert a row, replacing any row with the same `chunk_id`.
    async fn upsert(&self, row: &StoredVector) -> Result<()>;

    async fn similarity_query(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredRecord>>;

    /// All chunks of a document ordered by `chunk_index`.
    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>>;

    /// Remove every chunk of a document, returning how many were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Remove every chunk of a document and insert `rows` in its place,
    /// returning how many rows were removed.
    ///
    /// The default deletes then upserts one row at a time. Engines that can
    /// do it atomically override this.
    async fn replace_document(&self, document_id: &str, rows: &[StoredVector]) -> Result<usize> {
        let removed = self.delete_document(document_id).await?;
        for row in rows {
            self.upsert(row).await?;
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize>;

    /// Release connections. The default does nothing.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// In-Memory Storage (for testing and small deployments)
// ============================================================================

/// In-memory storage engine with exact cosine scan.
///
/// DDL is recorded rather than interpreted, so index management can be
/// observed in tests through [`InMemoryVectorStorage::executed`].
pub struct InMemoryVectorStorage {
    rows: Arc<RwLock<HashMap<String, StoredVector>>>,
    statements: Arc<RwLock<Vec<String>>>,
    supported: Vec<IndexKind>,
}

impl InMemoryVectorStorage {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            statements: Arc::new(RwLock::new(Vec::new())),
            supported: vec![IndexKind::None, IndexKind::IvfFlat, IndexKind::Hnsw],
        }
    }

    /// Restrict which index kinds this engine claims to build.
    pub fn with_supported(mut self, kinds: Vec<IndexKind>) -> Self {
        self.supported = kinds;
        self
    }

    /// Statements passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.statements.read().clone()
    }
}

impl Default for InMemoryVectorStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStorage for InMemoryVectorStorage {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    fn dialect(&self) -> StorageDialect {
        StorageDialect::InMemory
    }

    fn supports(&self, kind: IndexKind) -> bool {
        self.supported.contains(&kind)
    }

    async fn execute(&self, ddl: &str) -> Result<()> {
        self.statements.write().push(ddl.to_string());
        Ok(())
    }

    async fn upsert(&self, row: &StoredVector) -> Result<()> {
        let mut rows = self.rows.write();
        let mut row = row.clone();
        if let Some(existing) = rows.get(&row.chunk_id) {
            row.id = existing.id;
        }
        rows.insert(row.chunk_id.clone(), row);
        Ok(())
    }

    async fn similarity_query(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredRecord>> {
        let rows = self.rows.read();
        let mut scored: Vec<ScoredRecord> = rows
            .values()
            .map(|row| ScoredRecord {
                record: row.to_record(),
                score: cosine_similarity(embedding, &row.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.chunk_id.cmp(&b.record.chunk_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = self.rows.read();
        let mut chunks: Vec<ChunkRecord> = rows
            .values()
            .filter(|row| row.document_id == document_id)
            .map(StoredVector::to_record)
            .collect();
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, row| row.document_id != document_id);
        Ok(before - rows.len())
    }

    async fn replace_document(&self, document_id: &str, rows: &[StoredVector]) -> Result<usize> {
        let mut stored = self.rows.write();
        let before = stored.len();
        stored.retain(|_, row| row.document_id != document_id);
        let removed = before - stored.len();
        for row in rows {
            stored.insert(row.chunk_id.clone(), row.clone());
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.rows.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn row(document_id: &str, index: usize, embedding: Vec<f32>) -> StoredVector {
        StoredVector {
            id: Uuid::new_v4(),
            chunk_id: format!("{}_chunk_{}", document_id, index),
            document_id: document_id.to_string(),
            chunk_index: index,
            title: None,
            content: format!("{} chunk {}", document_id, index),
            embedding,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_index_kind_parsing() {
        assert_eq!("HNSW".parse::<IndexKind>().unwrap(), IndexKind::Hnsw);
        assert_eq!("ivfflat".parse::<IndexKind>().unwrap(), IndexKind::IvfFlat);
        assert_eq!("none".parse::<IndexKind>().unwrap(), IndexKind::None);
        assert!(matches!(
            "annoy".parse::<IndexKind>(),
            Err(RagError::UnsupportedIndexType(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_chunk_id() {
        let storage = InMemoryVectorStorage::new();
        let first = row("doc", 0, vec![1.0, 0.0]);
        storage.upsert(&first).await.unwrap();

        let mut second = row("doc", 0, vec![0.0, 1.0]);
        second.content = "updated".into();
        storage.upsert(&second).await.unwrap();

        assert_eq!(storage.count().await.unwrap(), 1);
        let chunks = storage.chunks_for_document("doc").await.unwrap();
        assert_eq!(chunks[0].content, "updated");
        assert_eq!(chunks[0].id, first.id);
    }

    #[tokio::test]
    async fn test_similarity_query_orders_by_score() {
        let storage = InMemoryVectorStorage::new();
        storage.upsert(&row("a", 0, vec![1.0, 0.0])).await.unwrap();
        storage.upsert(&row("b", 0, vec![0.7, 0.7])).await.unwrap();
        storage.upsert(&row("c", 0, vec![0.0, 1.0])).await.unwrap();

        let results = storage.similarity_query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.document_id, "a");
        assert_eq!(results[1].record.document_id, "b");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_chunks_for_document_sorted_and_delete() {
        let storage = InMemoryVectorStorage::new();
        for i in [2, 0, 1] {
            storage.upsert(&row("doc", i, vec![1.0])).await.unwrap();
        }
        storage.upsert(&row("other", 0, vec![1.0])).await.unwrap();

        let chunks = storage.chunks_for_document("doc").await.unwrap();
        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        assert_eq!(storage.delete_document("doc").await.unwrap(), 3);
        assert_eq!(storage.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_document_swaps_all_chunks() {
        let storage = InMemoryVectorStorage::new();
        for i in 0..4 {
            storage.upsert(&row("doc", i, vec![1.0])).await.unwrap();
        }
        storage.upsert(&row("other", 0, vec![1.0])).await.unwrap();

        let mut replacement = row("doc", 0, vec![0.5]);
        replacement.content = "new".into();
        let removed = storage
            .replace_document("doc", &[replacement])
            .await
            .unwrap();

        assert_eq!(removed, 4);
        let chunks = storage.chunks_for_document("doc").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "new");
        assert_eq!(storage.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_execute_records_statements() {
        let storage = InMemoryVectorStorage::new();
        storage.execute("CREATE TABLE t ()").await.unwrap();
        assert_eq!(storage.executed(), vec!["CREATE TABLE t ()".to_string()]);
    }
}
