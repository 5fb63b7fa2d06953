//! Worker-pool executor: bounded dispatch of blocking work.
//!
//! `Thread` dispatches onto the Tokio blocking thread pool via `spawn_blocking`.
//! `Process` is this crate's stand-in for a true OS-process pool (see DESIGN.md):
//! it dispatches onto ordinary Tokio tasks, giving the same bounded-concurrency
//! contract without a second IPC-based execution path.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    Thread,
    Process,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerPoolConfig {
    pub worker_type: WorkerType,
    pub count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("worker task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Bounded pool of workers running blocking closures, sized by `WorkerPoolConfig.count`.
#[derive(Clone)]
pub struct WorkerPool {
    worker_type: WorkerType,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            worker_type: config.worker_type,
            permits: Arc::new(Semaphore::new(config.count.max(1))),
        }
    }

    pub fn worker_type(&self) -> WorkerType {
        self.worker_type
    }

    /// Submit blocking work. Resolves once a worker slot is free and the work completes.
    pub async fn submit<F, R>(&self, f: F) -> Result<R, ExecutorError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("WorkerPool semaphore is never closed");
        match self.worker_type {
            WorkerType::Thread => {
                let value = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f()
                })
                .await?;
                Ok(value)
            }
            WorkerType::Process => {
                let value = tokio::spawn(async move {
                    let _permit = permit;
                    f()
                })
                .await?;
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn submit_returns_closure_result() {
        let pool = WorkerPool::new(WorkerPoolConfig { worker_type: WorkerType::Thread, count: 2 });
        let value = pool.submit(|| 2 + 2).await.unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test]
    async fn bounds_concurrency_to_pool_count() {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig { worker_type: WorkerType::Process, count: 1 }));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                pool.submit(move || {
                    let n = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(n, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
