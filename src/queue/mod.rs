//! Typed FIFO queues connecting the fetch, reply and send tasks.
//!
//! `MemoryQueue` is an in-process backend; `RedisQueue` is a cross-process backend
//! so queues can be shared when the executor runs work as separate OS processes.

mod memory;
mod redis_backend;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub use memory::MemoryQueue;
pub use redis_backend::RedisQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue put timed out")]
    Full,
    #[error("redis backend error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("message serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum QueueConfig {
    Memory {
        max_size: usize,
        timeout_secs: u64,
    },
    Redis {
        host: String,
        port: u16,
        db: i64,
        username: Option<String>,
        password: Option<crate::config::SecretString>,
        key: String,
        timeout_secs: u64,
    },
}

/// A FIFO of `T` with blocking, timeout-bounded put/get.
///
/// `put`/`get` accept an optional timeout: `None` means "fail/return-empty immediately
/// if the operation cannot proceed", `Some(d)` means "wait up to `d`".
#[async_trait]
pub trait AnyQueue<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn put(&self, item: T, timeout: Option<Duration>) -> Result<(), QueueError>;
    async fn get(&self, timeout: Option<Duration>) -> Result<Option<T>, QueueError>;

    /// Whether instances of this queue can be shared safely across threads in one process.
    fn is_thread_safe(&self) -> bool;
    /// Whether instances of this queue can be shared safely across separate processes.
    fn is_process_safe(&self) -> bool;
}
