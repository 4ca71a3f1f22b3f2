//! PostgreSQL pgvector storage engine.
//!
//! Vectors are bound as pgvector text literals (`'[0.1,0.2,...]'`) and cast
//! with `::vector`, so no extra type crate is needed. Similarity uses the
//! cosine distance operator `<=>`; scores are `1 - distance`.
//!
//! # Feature Flag
//!
//! Enable with `--features pgvector`
//!
//! # Example
//!
//! ```rust,ignore
//! use ragcore::db::PgVectorStorage;
//!
//! let storage = PgVectorStorage::connect("postgres://localhost/rag", "rag_chunks").await?;
//! let index = VectorIndex::new(Arc::new(storage), IndexConfig::default())?;
//! index.ensure_schema().await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use uuid::Uuid;

use crate::db::vectorstore::{IndexKind, StorageDialect, VectorStorage};
use crate::types::{ChunkRecord, Metadata, RagError, Result, ScoredRecord, StoredVector};

pub struct PgVectorStorage {
    pool: PgPool,
    table: String,
}

impl PgVectorStorage {
    pub async fn connect(url: &str, table: impl Into<String>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(storage_error)?;
        Ok(Self::from_pool(pool, table))
    }

    pub fn from_pool(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn columns() -> &'static str {
        "id, chunk_id, document_id, chunk_index, title, content, metadata, created_at"
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}, embedding) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::vector) \
             ON CONFLICT (chunk_id) DO UPDATE SET \
             document_id = EXCLUDED.document_id, \
             chunk_index = EXCLUDED.chunk_index, \
             title = EXCLUDED.title, \
             content = EXCLUDED.content, \
             metadata = EXCLUDED.metadata, \
             embedding = EXCLUDED.embedding",
            self.table,
            Self::columns()
        )
    }

    fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE document_id = $1", self.table)
    }
}

fn bind_row<'q>(
    query: Query<'q, Postgres, PgArguments>,
    row: &'q StoredVector,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(row.id)
        .bind(&row.chunk_id)
        .bind(&row.document_id)
        .bind(row.chunk_index as i32)
        .bind(&row.title)
        .bind(&row.content)
        .bind(sqlx::types::Json(&row.metadata))
        .bind(row.created_at)
        .bind(vector_literal(&row.embedding))
}

fn storage_error(e: sqlx::Error) -> RagError {
    RagError::Storage(e.to_string())
}

/// pgvector text representation of an embedding.
fn vector_literal(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(","))
}

fn record_from_row(row: &PgRow) -> Result<ChunkRecord> {
    let chunk_index: i32 = row.try_get("chunk_index").map_err(storage_error)?;
    let metadata: sqlx::types::Json<Metadata> = row.try_get("metadata").map_err(storage_error)?;
    Ok(ChunkRecord {
        id: row.try_get::<Uuid, _>("id").map_err(storage_error)?,
        chunk_id: row.try_get("chunk_id").map_err(storage_error)?,
        document_id: row.try_get("document_id").map_err(storage_error)?,
        chunk_index: chunk_index.max(0) as usize,
        title: row.try_get("title").map_err(storage_error)?,
        content: row.try_get("content").map_err(storage_error)?,
        metadata: metadata.0,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(storage_error)?,
    })
}

#[async_trait]
impl VectorStorage for PgVectorStorage {
    fn provider_name(&self) -> &'static str {
        "pgvector"
    }

    fn dialect(&self) -> StorageDialect {
        StorageDialect::Postgres
    }

    fn supports(&self, _kind: IndexKind) -> bool {
        true
    }

    async fn execute(&self, ddl: &str) -> Result<()> {
        sqlx::raw_sql(ddl)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn upsert(&self, row: &StoredVector) -> Result<()> {
        let sql = self.upsert_sql();
        bind_row(sqlx::query(&sql), row)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    /// Delete and re-insert inside one transaction, so readers see either
    /// the old chunks or the new ones.
    async fn replace_document(&self, document_id: &str, rows: &[StoredVector]) -> Result<usize> {
        let delete_sql = self.delete_sql();
        let upsert_sql = self.upsert_sql();

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let removed = sqlx::query(&delete_sql)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?
            .rows_affected();
        for row in rows {
            bind_row(sqlx::query(&upsert_sql), row)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(removed as usize)
    }

    async fn similarity_query(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredRecord>> {
        let sql = format!(
            "SELECT {}, 1 - (embedding <=> $1::vector) AS score \
             FROM {} ORDER BY embedding <=> $1::vector LIMIT $2",
            Self::columns(),
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(vector_literal(embedding))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter()
            .map(|row| {
                let score: f64 = row.try_get("score").map_err(storage_error)?;
                Ok(ScoredRecord {
                    record: record_from_row(row)?,
                    score: score as f32,
                })
            })
            .collect()
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE document_id = $1 ORDER BY chunk_index",
            Self::columns(),
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let sql = self.delete_sql();
        let result = sqlx::query(&sql)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.table);
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        let n: i64 = row.try_get("n").map_err(storage_error)?;
        Ok(n.max(0) as usize)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
