//! Bounded worker pool
//!
//! A counting semaphore over tokio tasks. Work holds a permit only while it
//! runs; callers waiting on a timer (retry backoff) hold nothing.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Default number of concurrent workers
pub const DEFAULT_POOL_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by running work
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` once a permit is free, releasing the permit afterwards.
    ///
    /// Returns `None` only if the pool has been shut down.
    pub async fn execute<F>(&self, work: F) -> Option<F::Output>
    where
        F: Future,
    {
        let _permit = self.permits.acquire().await.ok()?;
        Some(work.await)
    }

    /// Detached variant of [`execute`](Self::execute)
    pub fn spawn<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.execute(work).await;
        })
    }

    /// Stop handing out permits; queued work is dropped
    pub fn shutdown(&self) {
        self.permits.close();
    }
}
