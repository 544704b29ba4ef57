//! Bounded worker pool for per-group work
//!
//! Provides:
//! - at most `max_workers` groups in flight at once
//! - results returned in input order
//! - pool statistics and monitoring

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs started
    pub total_started: usize,
    /// Jobs finished
    pub completed: usize,
    /// Jobs currently running
    pub active_count: usize,
    /// Highest number of jobs running at once
    pub peak_active: usize,
}

/// Runs keyed jobs with bounded concurrency
#[derive(Debug)]
pub struct WorkerPool {
    /// Maximum concurrent jobs
    max_workers: usize,
    /// Keys of running jobs and when they started
    active: DashMap<String, Instant>,
    /// Statistics
    stats: Mutex<PoolStats>,
}

impl WorkerPool {
    /// Create new pool; a zero size is raised to one
    #[inline]
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            active: DashMap::new(),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Maximum concurrent jobs
    #[inline]
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run every job, at most `max_workers` at a time
    ///
    /// # Arguments
    /// * `jobs` - job key and input, in the order results are wanted
    /// * `work` - per-job future factory
    ///
    /// # Returns
    /// One result per job, in input order
    pub async fn run<T, R, F, Fut>(&self, jobs: Vec<(String, T)>, work: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let work = &work;
        stream::iter(jobs)
            .map(|(key, input)| async move {
                self.acquire(&key).await;
                let result = work(input).await;
                self.release(&key).await;
                result
            })
            .buffered(self.max_workers)
            .collect()
            .await
    }

    async fn acquire(&self, key: &str) {
        self.active.insert(key.to_string(), Instant::now());

        let mut stats = self.stats.lock().await;
        stats.total_started += 1;
        stats.active_count = self.active.len();
        stats.peak_active = stats.peak_active.max(stats.active_count);
    }

    async fn release(&self, key: &str) {
        if let Some((_, started)) = self.active.remove(key) {
            tracing::debug!(
                group = key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "group finished"
            );
        }

        let mut stats = self.stats.lock().await;
        stats.completed += 1;
        stats.active_count = self.active.len();
    }

    /// Get pool statistics
    #[inline]
    pub async fn stats(&self) -> PoolStats {
        self.stats.lock().await.clone()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(2)
    }
}
