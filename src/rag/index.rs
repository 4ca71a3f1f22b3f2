//! Vector index management.
//!
//! [`VectorIndex`] persists chunk embeddings through a [`VectorStorage`]
//! engine, enforces the configured embedding dimension, and picks an ANN
//! index structure as the corpus grows:
//!
//! | rows                 | index                                   |
//! |----------------------|-----------------------------------------|
//! | `< 1,000`            | none (exact scan)                       |
//! | `1,000 ..= 100,000`  | IVFFlat, `lists = ceil(sqrt(rows))`     |
//! | `> 100,000`          | HNSW, `m = 16`, `ef_construction = 64`  |
//!
//! The thresholds come from [`IndexConfig`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::vectorstore::{IndexKind, StorageDialect, VectorStorage};
use crate::types::{ChunkRecord, Metadata, RagError, Result, ScoredRecord, StoredVector, TextChunk};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Table holding chunk vectors
    #[serde(default = "default_table")]
    pub table: String,

    /// Embedding dimension enforced on every insert and query
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Row count at which an IVFFlat index becomes worthwhile
    #[serde(default = "default_ivfflat_min_rows")]
    pub ivfflat_min_rows: usize,

    /// Row count above which HNSW replaces IVFFlat
    #[serde(default = "default_hnsw_min_rows")]
    pub hnsw_min_rows: usize,

    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u32,

    #[serde(default = "default_hnsw_ef_construction")]
    pub hnsw_ef_construction: u32,
}

fn default_table() -> String {
    "rag_chunks".to_string()
}

fn default_dimension() -> usize {
    384
}

fn default_ivfflat_min_rows() -> usize {
    1_000
}

fn default_hnsw_min_rows() -> usize {
    100_000
}

fn default_hnsw_m() -> u32 {
    16
}

fn default_hnsw_ef_construction() -> u32 {
    64
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            dimension: default_dimension(),
            ivfflat_min_rows: default_ivfflat_min_rows(),
            hnsw_min_rows: default_hnsw_min_rows(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef_construction(),
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RagError::Config("index.dimension must be > 0".to_string()));
        }
        if self.ivfflat_min_rows > self.hnsw_min_rows {
            return Err(RagError::Config(
                "index.ivfflat_min_rows must not exceed index.hnsw_min_rows".to_string(),
            ));
        }
        let valid_table = !self.table.is_empty()
            && self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_table {
            return Err(RagError::Config(format!(
                "index.table '{}' must be a plain SQL identifier",
                self.table
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Index Recommendation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexRecommendation {
    None,
    IvfFlat { lists: u32 },
    Hnsw { m: u32, ef_construction: u32 },
}

impl IndexRecommendation {
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::None => IndexKind::None,
            Self::IvfFlat { .. } => IndexKind::IvfFlat,
            Self::Hnsw { .. } => IndexKind::Hnsw,
        }
    }

    /// Build a recommendation from an index type name and the configured
    /// parameters.
    pub fn from_name(name: &str, rows: usize, config: &IndexConfig) -> Result<Self> {
        Ok(match name.parse::<IndexKind>()? {
            IndexKind::None => Self::None,
            IndexKind::IvfFlat => Self::IvfFlat {
                lists: ivfflat_lists(rows),
            },
            IndexKind::Hnsw => Self::Hnsw {
                m: config.hnsw_m,
                ef_construction: config.hnsw_ef_construction,
            },
        })
    }

    /// `CREATE INDEX` statement for this recommendation, if it needs one.
    pub fn create_ddl(&self, table: &str, dialect: StorageDialect) -> Option<String> {
        let name = index_name(table);
        let (method, options) = match self {
            Self::None => return None,
            Self::IvfFlat { lists } => ("ivfflat", format!("lists = {}", lists)),
            Self::Hnsw { m, ef_construction } => (
                "hnsw",
                format!("m = {}, ef_construction = {}", m, ef_construction),
            ),
        };
        Some(match dialect {
            StorageDialect::Postgres | StorageDialect::InMemory => format!(
                "CREATE INDEX IF NOT EXISTS {name} ON {table} USING {method} (embedding vector_cosine_ops) WITH ({options})"
            ),
        })
    }

    pub fn drop_ddl(table: &str, dialect: StorageDialect) -> String {
        match dialect {
            StorageDialect::Postgres | StorageDialect::InMemory => {
                format!("DROP INDEX IF EXISTS {}", index_name(table))
            }
        }
    }
}

impl std::fmt::Display for IndexRecommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::IvfFlat { lists } => write!(f, "ivfflat(lists={})", lists),
            Self::Hnsw { m, ef_construction } => {
                write!(f, "hnsw(m={}, ef_construction={})", m, ef_construction)
            }
        }
    }
}

fn index_name(table: &str) -> String {
    format!("{}_embedding_ann", table)
}

fn ivfflat_lists(rows: usize) -> u32 {
    ((rows as f64).sqrt().ceil() as u32).max(1)
}

/// Pick an index for a corpus of `rows` vectors.
pub fn recommend_index(rows: usize, config: &IndexConfig) -> IndexRecommendation {
    if rows < config.ivfflat_min_rows {
        IndexRecommendation::None
    } else if rows <= config.hnsw_min_rows {
        IndexRecommendation::IvfFlat {
            lists: ivfflat_lists(rows),
        }
    } else {
        IndexRecommendation::Hnsw {
            m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
        }
    }
}

/// Outcome of [`VectorIndex::apply_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The same configuration was already in place
    Unchanged,
    Applied {
        previous: IndexRecommendation,
        current: IndexRecommendation,
    },
}

// ============================================================================
// Vector Index
// ============================================================================

pub struct VectorIndex {
    storage: Arc<dyn VectorStorage>,
    config: IndexConfig,
    applied: Mutex<IndexRecommendation>,
}

impl VectorIndex {
    pub fn new(storage: Arc<dyn VectorStorage>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            applied: Mutex::new(IndexRecommendation::None),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn VectorStorage> {
        &self.storage
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.config.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    /// Create the vector table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        let table = &self.config.table;
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id UUID PRIMARY KEY, \
                 chunk_id TEXT NOT NULL UNIQUE, \
                 document_id TEXT NOT NULL, \
                 chunk_index INTEGER NOT NULL, \
                 title TEXT, \
                 content TEXT NOT NULL, \
                 embedding vector({dim}) NOT NULL, \
                 metadata JSONB NOT NULL DEFAULT '{{}}', \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
                dim = self.config.dimension
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {table}_document_idx ON {table} (document_id, chunk_index)"
            ),
        ];
        for statement in &statements {
            self.storage.execute(statement).await?;
        }
        debug!(table = %table, "vector schema ready");
        Ok(())
    }

    pub async fn upsert(&self, chunk: &TextChunk, embedding: Vec<f32>, metadata: Metadata) -> Result<()> {
        let row = self.build_row(chunk, embedding, metadata)?;
        self.storage.upsert(&row).await
    }

    /// Replace every stored chunk of `document_id` with `chunks` in one
    /// storage operation. Nothing is written if any embedding has the wrong
    /// dimension. Returns how many previous rows were removed.
    pub async fn replace_document(
        &self,
        document_id: &str,
        chunks: Vec<(TextChunk, Vec<f32>)>,
        metadata: &Metadata,
    ) -> Result<usize> {
        let rows = chunks
            .into_iter()
            .map(|(chunk, embedding)| self.build_row(&chunk, embedding, metadata.clone()))
            .collect::<Result<Vec<_>>>()?;
        self.storage.replace_document(document_id, &rows).await
    }

    fn build_row(&self, chunk: &TextChunk, embedding: Vec<f32>, metadata: Metadata) -> Result<StoredVector> {
        self.check_dimension(&embedding)?;

        let title = metadata
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let mut metadata = metadata;
        if let Some(section) = &chunk.metadata.section {
            metadata
                .entry("section")
                .or_insert_with(|| serde_json::Value::String(section.clone()));
        }

        Ok(StoredVector {
            id: Uuid::new_v4(),
            chunk_id: chunk.id.clone(),
            document_id: chunk.metadata.document_id.clone(),
            chunk_index: chunk.metadata.chunk_index,
            title,
            content: chunk.content.clone(),
            embedding,
            metadata,
            created_at: Utc::now(),
        })
    }

    /// Nearest rows scoring at least `threshold`, highest first.
    pub async fn query(&self, embedding: &[f32], limit: usize, threshold: f32) -> Result<Vec<ScoredRecord>> {
        self.check_dimension(embedding)?;
        let mut rows = self.storage.similarity_query(embedding, limit).await?;
        rows.retain(|row| row.score >= threshold);
        Ok(rows)
    }

    pub async fn document_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        self.storage.chunks_for_document(document_id).await
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        self.storage.delete_document(document_id).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.storage.count().await
    }

    pub fn recommend_index(&self, rows: usize) -> IndexRecommendation {
        recommend_index(rows, &self.config)
    }

    pub async fn current_index(&self) -> IndexRecommendation {
        *self.applied.lock().await
    }

    /// Bring the storage engine's ANN index in line with `recommendation`.
    ///
    /// Re-applying the configuration already in place is a no-op. Otherwise
    /// the named ANN index is always dropped first, so an index left behind
    /// by an earlier process is replaced too. If any statement fails the
    /// index is recorded as absent.
    pub async fn apply_index(&self, recommendation: IndexRecommendation) -> Result<ApplyOutcome> {
        let mut applied = self.applied.lock().await;
        if *applied == recommendation {
            debug!(index = %recommendation, "index already applied");
            return Ok(ApplyOutcome::Unchanged);
        }

        if !self.storage.supports(recommendation.kind()) {
            return Err(RagError::UnsupportedIndexType(format!(
                "{} is not supported by {}",
                recommendation.kind(),
                self.storage.provider_name()
            )));
        }

        if let Err(e) = self.rebuild_index(recommendation).await {
            let previous = std::mem::replace(&mut *applied, IndexRecommendation::None);
            warn!(from = %previous, to = %recommendation, error = %e, "vector index update failed");
            return Err(e);
        }

        let previous = std::mem::replace(&mut *applied, recommendation);
        info!(from = %previous, to = %recommendation, "vector index updated");
        Ok(ApplyOutcome::Applied {
            previous,
            current: recommendation,
        })
    }

    async fn rebuild_index(&self, recommendation: IndexRecommendation) -> Result<()> {
        let dialect = self.storage.dialect();
        self.storage
            .execute(&IndexRecommendation::drop_ddl(&self.config.table, dialect))
            .await?;
        if let Some(ddl) = recommendation.create_ddl(&self.config.table, dialect) {
            self.storage.execute(&ddl).await?;
        }
        Ok(())
    }

    /// Recommend from the current row count and apply the result.
    pub async fn auto_tune(&self) -> Result<ApplyOutcome> {
        let rows = self.count().await?;
        let recommendation = self.recommend_index(rows);
        debug!(rows, index = %recommendation, "auto-tuning vector index");
        self.apply_index(recommendation).await
    }
}
