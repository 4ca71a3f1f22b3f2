use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form metadata attached to documents and stored vectors.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ============= Document Types =============

/// A raw document submitted for ingestion.
///
/// Documents are immutable once ingested. Re-ingesting a document with the
/// same `id` replaces every chunk previously stored for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            content: content.into(),
            source: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// A contiguous slice of a document's content.
///
/// `start_index` and `end_index` are byte offsets into the source text, always
/// on `char` boundaries, so `content == &text[start_index..end_index]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub content: String,
    pub start_index: usize,
    pub end_index: usize,
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    /// Stable chunk identifier for a document and chunk position.
    pub fn chunk_id(document_id: &str, index: usize) -> String {
        format!("{}_chunk_{}", document_id, index)
    }
}

// ============= Vector Types =============

/// A chunk embedding as persisted by a storage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredVector {
    pub id: Uuid,
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub title: Option<String>,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl StoredVector {
    /// Projection of this row without the embedding payload.
    pub fn to_record(&self) -> ChunkRecord {
        ChunkRecord {
            id: self.id,
            chunk_id: self.chunk_id.clone(),
            document_id: self.document_id.clone(),
            chunk_index: self.chunk_index,
            title: self.title.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

/// A stored chunk without its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub title: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    /// Display title, falling back to the document id.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.document_id)
    }
}

/// A row returned by a similarity query, scored by cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: ChunkRecord,
    pub score: f32,
}

// ============= Search Types =============

/// Neighbouring chunks of a match, in `chunk_index` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindow {
    pub before: Vec<ChunkRecord>,
    pub after: Vec<ChunkRecord>,
    pub combined_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub document: ChunkRecord,
    pub score: f32,
    /// 1-indexed rank by descending score
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextWindow>,
}

impl SearchResultItem {
    /// Text handed to the prompt: the context window if present, else the chunk.
    pub fn prompt_text(&self) -> &str {
        match &self.context {
            Some(window) => &window.combined_text,
            None => &self.document.content,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    /// Candidates that passed threshold and filters, before diversification
    pub total_matches: usize,
}

// ============= RAG Response Types =============

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Source {
    pub title: String,
    pub preview: String,
    pub score: f32,
    pub document_id: String,
    pub chunk_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub retrieval_time_ms: u64,
    pub generation_time_ms: u64,
    pub total_time_ms: u64,
    pub chunks_used: usize,
    pub context_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub metadata: ResponseMetadata,
}

// ============= Conversation Types =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

// ============= Error Types =============

#[derive(Debug, Clone, thiserror::Error)]
pub enum RagError {
    #[error("Invalid chunking configuration: {0}")]
    ChunkingConfig(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unsupported index type: {0}")]
    UnsupportedIndexType(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("No context available: {0}")]
    NoContext(String),

    #[error("Prompt too large: {required} tokens needed, budget is {budget}")]
    PromptTooLarge { required: usize, budget: usize },

    #[error("Generation failed: {message}")]
    GenerationFailure {
        message: String,
        /// Retrieval time already spent when the failure happened
        retrieval_time_ms: Option<u64>,
    },

    #[error("Generation timed out after {timeout_ms}ms")]
    GenerationTimeout {
        timeout_ms: u64,
        retrieval_time_ms: Option<u64>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn generation(message: impl Into<String>) -> Self {
        RagError::GenerationFailure {
            message: message.into(),
            retrieval_time_ms: None,
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        RagError::GenerationTimeout {
            timeout_ms: timeout.as_millis() as u64,
            retrieval_time_ms: None,
        }
    }

    /// Attach the retrieval time to a generation error.
    pub fn with_retrieval_time(self, ms: u64) -> Self {
        match self {
            RagError::GenerationFailure { message, .. } => RagError::GenerationFailure {
                message,
                retrieval_time_ms: Some(ms),
            },
            RagError::GenerationTimeout { timeout_ms, .. } => RagError::GenerationTimeout {
                timeout_ms,
                retrieval_time_ms: Some(ms),
            },
            other => other,
        }
    }

    /// Transient failures a caller may retry. Validation errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Storage(_)
                | RagError::Embedding(_)
                | RagError::GenerationFailure { .. }
                | RagError::GenerationTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
