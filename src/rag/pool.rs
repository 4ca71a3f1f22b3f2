//! Bounded worker pool and cooperative cancellation.
//!
//! At most `concurrency` jobs run at once. Each spawned job holds an owned
//! semaphore permit and releases it when it completes, so a new job starts
//! as soon as any running one finishes.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragcore::rag::pool::WorkerPool;
//!
//! let pool = WorkerPool::new(4);
//! let lengths = pool.run(texts, |text| async move { text.len() }).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::types::{RagError, Result};

// ============================================================================
// Worker Pool
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    /// Create a pool; a concurrency of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| RagError::Cancelled)
    }

    /// Run `job` over every item and return the outputs in input order.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, job: F) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        let mut set = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permit = self.acquire().await?;
            let task = job(item);
            set.spawn(async move {
                let output = task.await;
                drop(permit);
                (index, output)
            });
        }

        let mut outputs: Vec<Option<R>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (index, output) =
                joined.map_err(|e| RagError::Internal(format!("worker task failed: {}", e)))?;
            outputs[index] = Some(output);
        }

        Ok(outputs.into_iter().flatten().collect())
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Owner side of a cooperative cancellation signal.
#[derive(Debug)]
pub struct CancelSource {
    sender: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked by batch operations at group boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn none() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }
}
