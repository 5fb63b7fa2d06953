//! In-process queue backend: a mutex-guarded deque with condition-variable-style waiters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{AnyQueue, QueueError};

pub struct MemoryQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> MemoryQueue<T> {
    /// `capacity` of 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::new()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> AnyQueue<T> for MemoryQueue<T> {
    async fn put(&self, item: T, timeout: Option<Duration>) -> Result<(), QueueError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut item = Some(item);
        loop {
            {
                let mut guard = self.inner.lock().await;
                if self.capacity == 0 || guard.len() < self.capacity {
                    guard.push_back(item.take().expect("item only taken once it is queued"));
                    drop(guard);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            match deadline {
                None => return Err(QueueError::Full),
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(QueueError::Full);
                    }
                    let notified = self.not_full.notified();
                    tokio::pin!(notified);
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(remaining) => { return Err(QueueError::Full); }
                    }
                }
            }
        }
    }

    async fn get(&self, timeout: Option<Duration>) -> Result<Option<T>, QueueError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(item) = guard.pop_front() {
                    drop(guard);
                    self.not_full.notify_one();
                    return Ok(Some(item));
                }
            }
            match deadline {
                None => return Ok(None),
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    let notified = self.not_empty.notified();
                    tokio::pin!(notified);
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(remaining) => { return Ok(None); }
                    }
                }
            }
        }
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn is_process_safe(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let q: MemoryQueue<i32> = MemoryQueue::new(0);
        q.put(7, None).await.unwrap();
        assert_eq!(q.get(None).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn get_on_empty_without_timeout_returns_none_immediately() {
        let q: MemoryQueue<i32> = MemoryQueue::new(0);
        let started = std::time::Instant::now();
        assert_eq!(q.get(None).await.unwrap(), None);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn put_blocks_when_full_until_capacity_frees() {
        let q = Arc::new(MemoryQueue::<i32>::new(1));
        q.put(1, None).await.unwrap();

        let q2 = q.clone();
        let putter = tokio::spawn(async move { q2.put(2, Some(Duration::from_secs(1))).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.get(None).await.unwrap(), Some(1));
        putter.await.unwrap().unwrap();
        assert_eq!(q.get(None).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn put_times_out_when_queue_stays_full() {
        let q: MemoryQueue<i32> = MemoryQueue::new(1);
        q.put(1, None).await.unwrap();
        let result = q.put(2, Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(QueueError::Full)));
    }
}
