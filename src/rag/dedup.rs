//! Request deduplication for embedding work.
//!
//! Concurrent requests for the same text share a single in-flight
//! computation. Every waiter observes the same embedding or the same error.
//! The in-flight record is removed as soon as the computation settles, and
//! failures are never cached, so a retry always computes again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rag::cache::EmbeddingCache;
use crate::types::Result;

type InFlight = Shared<BoxFuture<'static, Result<Arc<Vec<f32>>>>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupStats {
    /// Underlying computations started
    pub computations: u64,
    /// Callers that joined a computation already in flight
    pub joined: u64,
    /// Computations currently in flight
    pub in_flight: usize,
}

struct Inner {
    cache: Arc<dyn EmbeddingCache>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    computations: AtomicU64,
    joined: AtomicU64,
}

/// Single writer in front of an [`EmbeddingCache`].
#[derive(Clone)]
pub struct RequestDeduplicator {
    inner: Arc<Inner>,
}

impl RequestDeduplicator {
    pub fn new(cache: Arc<dyn EmbeddingCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                in_flight: Mutex::new(HashMap::new()),
                computations: AtomicU64::new(0),
                joined: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<dyn EmbeddingCache> {
        &self.inner.cache
    }

    /// Return the cached embedding for `text`, join a computation already in
    /// flight for it, or start one with `compute`.
    pub async fn get_or_compute<F, Fut>(&self, text: &str, compute: F) -> Result<Vec<f32>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Vec<f32>>> + Send + 'static,
    {
        let key = self.inner.cache.compute_key(text);
        if let Some(hit) = self.inner.cache.get(&key) {
            return Ok(hit);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(existing) = in_flight.get(&key) {
                self.inner.joined.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "joining in-flight embedding");
                existing.clone()
            } else if let Some(hit) = self.inner.cache.peek(&key) {
                // settled between the first lookup and taking the lock
                return Ok(hit);
            } else {
                self.inner.computations.fetch_add(1, Ordering::Relaxed);
                let task = self.settle(key.clone(), compute(text.to_string()));
                in_flight.insert(key, task.clone());
                task
            }
        };

        shared.await.map(|embedding| embedding.as_ref().clone())
    }

    /// Wrap a computation so it writes the cache on success and always
    /// removes its own in-flight record.
    fn settle<Fut>(&self, key: String, computation: Fut) -> InFlight
    where
        Fut: Future<Output = Result<Vec<f32>>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        async move {
            let outcome = computation.await.map(Arc::new);
            match &outcome {
                Ok(embedding) => {
                    if let Err(e) = inner.cache.set(&key, embedding.as_ref().clone()) {
                        warn!(error = %e, "failed to cache embedding");
                    }
                }
                Err(e) => debug!(error = %e, "embedding computation failed"),
            }
            inner.in_flight.lock().remove(&key);
            outcome
        }
        .boxed()
        .shared()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            computations: self.inner.computations.load(Ordering::Relaxed),
            joined: self.inner.joined.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }
}
