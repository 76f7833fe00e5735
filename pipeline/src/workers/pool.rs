//! Bounded worker pool
//!
//! Jobs are spawned immediately but wait on a fair semaphore before running,
//! so at most `max_concurrency` execute at once and the rest start in
//! submission order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{PipelineError, PipelineResult};

/// Handle to a submitted job whose failures are recorded on its entity
pub type JobHandle = JoinHandle<PipelineResult<()>>;

/// Queue depth and activity of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_concurrency: usize,
    pub queued: usize,
    pub running: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

struct Gauge(Arc<AtomicUsize>);

impl Gauge {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Gauge {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(name: &'static str, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            name,
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            queued: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submit a job. The handle resolves once the job has run, or with
    /// `Cancelled` if the pool was closed while the job was still queued.
    pub fn submit<F>(&self, job: F) -> JoinHandle<PipelineResult<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let queued = Gauge::enter(&self.queued);
        let running_counter = Arc::clone(&self.running);
        let name = self.name;

        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            drop(queued);

            let _permit = permit.map_err(|_| {
                PipelineError::Cancelled(format!("{} pool is closed", name))
            })?;
            let _running = Gauge::enter(&running_counter);
            debug!(pool = name, "Job started");
            Ok(job.await)
        })
    }

    /// Stop admitting queued jobs; running jobs finish normally.
    ///
    /// Queued jobs resolve to `Cancelled`; their owners settle the records.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_concurrency: self.max_concurrency,
            queued: self.queued.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new("test", 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.stats().running, 0);
        assert_eq!(pool.stats().queued, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_jobs_start_in_submission_order() {
        let pool = WorkerPool::new("test", 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                pool.submit(async move {
                    order.lock().await.push(i);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_queued_jobs() {
        let pool = WorkerPool::new("test", 1);
        pool.close();
        let result = pool.submit(async { 1 }).await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled(_))));
    }
}
