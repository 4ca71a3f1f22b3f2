//! Mock implementations for testing.
//!
//! This module provides mock embedding and generation providers that can be
//! used across different test files without duplication.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use ragcore::llm::client::{GenerationConfig, GenerationProvider};
use ragcore::rag::embeddings::EmbeddingProvider;
use ragcore::types::{RagError, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Mock embedding provider producing bag-of-words vectors.
///
/// Every lowercase alphanumeric word is hashed into one of `dimension`
/// buckets, so texts sharing words have high cosine similarity and
/// unrelated texts score near zero.
///
/// # Examples
///
/// ```ignore
/// let provider = MockEmbeddingProvider::new(64);
/// let slow = MockEmbeddingProvider::new(64).with_delay(Duration::from_millis(20));
/// let broken = MockEmbeddingProvider::failing(64);
/// ```
pub struct MockEmbeddingProvider {
    dimension: usize,
    delay: Option<Duration>,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            delay: None,
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a provider whose every call fails.
    pub fn failing(dimension: usize) -> Self {
        Self {
            should_fail: true,
            ..Self::new(dimension)
        }
    }

    /// Sleep before answering, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `embed` calls that reached the provider.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(RagError::Embedding("Mock embedding failure".to_string()));
        }
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }
}

/// Mock generation provider with configurable behaviour.
///
/// Every prompt it receives is captured for later inspection.
pub struct MockGenerator {
    response: String,
    should_fail: bool,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    /// Create a generator that returns the given response.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a generator that always returns an error.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new("")
        }
    }

    /// Create a generator that answers after `delay`.
    pub fn slow(response: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(response)
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl GenerationProvider for MockGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerationConfig) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(RagError::generation("Mock generation failure"));
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "mock-generator"
    }
}
