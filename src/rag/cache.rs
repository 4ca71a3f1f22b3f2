//! Embedding Cache for RAG Pipeline
//!
//! This module provides caching for text embeddings so unchanged content is
//! never embedded twice. The cache sits underneath the
//! [`RequestDeduplicator`](crate::rag::dedup::RequestDeduplicator), which is
//! the only writer in normal operation.
//!
//! # Cache Key Strategy
//!
//! Cache keys are the SHA-256 hash of the text combined with its byte length:
//! - Unique keys for different content
//! - Consistent keys across restarts
//!
//! # Eviction
//!
//! Entries are evicted when their TTL elapses (checked on read, or in bulk by
//! `cleanup_expired`) and when the cache is at capacity, in which case the
//! least recently used entry goes first.
//!
//! # Example
//!
//! ```ignore
//! use ragcore::rag::cache::{CacheConfig, EmbeddingCache, LruEmbeddingCache};
//!
//! let cache = LruEmbeddingCache::new(CacheConfig {
//!     max_size: 10_000,
//!     ..Default::default()
//! });
//!
//! let key = cache.compute_key("hello world");
//! if cache.get(&key).is_none() {
//!     let embedding = embed("hello world").await?;
//!     cache.set(&key, embedding)?;
//! }
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Result;

// ============================================================================
// Cache Types
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of entries in cache
    pub entry_count: usize,
    /// Number of evictions due to capacity
    pub evictions: u64,
    /// Number of entries dropped because their TTL elapsed
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Configuration for the embedding cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached embeddings (default: 10,000)
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Time-to-live per entry in milliseconds (None = no expiry)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: Option<u64>,

    /// Whether the cache is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_size() -> usize {
    10_000
}

fn default_ttl_ms() -> Option<u64> {
    Some(60 * 60 * 1000) // 1 hour
}

fn default_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            ttl_ms: default_ttl_ms(),
            enabled: default_enabled(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Stable cache key for a piece of text.
pub fn cache_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}:{}", hasher.finalize(), text.len())
}

// ============================================================================
// Cache Trait
// ============================================================================

/// Trait for embedding cache implementations
///
/// Keys are produced by [`EmbeddingCache::compute_key`]. Implementations must
/// be safe to share between tasks.
pub trait EmbeddingCache: Send + Sync {
    /// Get an embedding from the cache
    fn get(&self, key: &str) -> Option<Vec<f32>>;

    /// Look up an entry without touching statistics or recency
    fn peek(&self, key: &str) -> Option<Vec<f32>> {
        self.get(key)
    }

    /// Store an embedding in the cache
    fn set(&self, key: &str, embedding: Vec<f32>) -> Result<()>;

    /// Remove an entry from the cache
    fn invalidate(&self, key: &str) -> Result<()>;

    /// Clear all entries from the cache
    fn clear(&self) -> Result<()>;

    /// Get cache statistics
    fn stats(&self) -> CacheStats;

    /// Compute a cache key for the given text
    fn compute_key(&self, text: &str) -> String {
        cache_key(text)
    }

    /// Drop expired entries, returning how many were removed
    fn cleanup_expired(&self) -> usize {
        0
    }

    /// Check if the cache is enabled
    fn is_enabled(&self) -> bool;
}

// ============================================================================
// LRU Cache Entry
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Vec<f32>,
    inserted_at: Instant,
    expires_at: Option<Instant>,
    hit_count: u64,
}

impl CacheEntry {
    fn new(embedding: Vec<f32>, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            embedding,
            inserted_at: now,
            expires_at: ttl.map(|d| now + d),
            hit_count: 0,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

// ============================================================================
// LRU Embedding Cache
// ============================================================================

/// In-memory LRU cache for embeddings
///
/// Capacity is a fixed number of entries. Reads check the TTL first and
/// evict stale entries, then promote the entry to most recently used.
pub struct LruEmbeddingCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LruEmbeddingCache {
    /// Create a new LRU embedding cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Create a cache with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Hits recorded for a key, without touching its recency
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.cache.lock().peek(key).map(|entry| entry.hit_count)
    }

    /// Age of an entry, without touching its recency
    pub fn age(&self, key: &str) -> Option<Duration> {
        self.cache
            .lock()
            .peek(key)
            .map(|entry| entry.inserted_at.elapsed())
    }

    /// Get the number of entries in the cache
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl EmbeddingCache for LruEmbeddingCache {
    fn get(&self, key: &str) -> Option<Vec<f32>> {
        if !self.config.enabled {
            return None;
        }

        let mut cache = self.cache.lock();
        let expired = match cache.peek(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            cache.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = cache.get_mut(key)?;
        entry.hit_count += 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.embedding.clone())
    }

    fn peek(&self, key: &str) -> Option<Vec<f32>> {
        if !self.config.enabled {
            return None;
        }
        self.cache
            .lock()
            .peek(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.embedding.clone())
    }

    fn set(&self, key: &str, embedding: Vec<f32>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let entry = CacheEntry::new(embedding, self.config.ttl());
        let mut cache = self.cache.lock();

        if !cache.contains(key) && cache.len() >= cache.cap().get() && cache.pop_lru().is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        cache.put(key.to_string(), entry);

        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<()> {
        self.cache.lock().pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.cache.lock().clear();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.cache.lock().len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn cleanup_expired(&self) -> usize {
        let mut cache = self.cache.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            cache.pop(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

// ============================================================================
// No-Op Cache
// ============================================================================

/// A no-op cache that doesn't store anything
///
/// Useful for disabling caching without changing the code structure.
/// Deduplication of concurrent requests still applies on top of it.
#[derive(Debug, Default)]
pub struct NoOpCache;

impl NoOpCache {
    pub fn new() -> Self {
        Self
    }
}

impl EmbeddingCache for NoOpCache {
    fn get(&self, _key: &str) -> Option<Vec<f32>> {
        None
    }

    fn set(&self, _key: &str, _embedding: Vec<f32>) -> Result<()> {
        Ok(())
    }

    fn invalidate(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
