//! Vector storage engines.
//!
//! - In-memory exact scan (always available)
//! - `pgvector` - PostgreSQL extension with IVFFlat and HNSW indexes
//!
//! Enable providers via Cargo features:
//! ```toml
//! ragcore = { version = "*", features = ["pgvector"] }
//! ```

#![allow(missing_docs)]

// Storage abstraction layer
pub mod vectorstore;

// Provider implementations
#[cfg(feature = "pgvector")]
pub mod pgvector;

// Re-exports
pub use vectorstore::{
    cosine_similarity, InMemoryVectorStorage, IndexKind, StorageDialect, VectorStorage,
};

#[cfg(feature = "pgvector")]
pub use pgvector::PgVectorStorage;
