//! Cross-process queue backend on top of a Redis list (LPUSH/BRPOP).

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use super::{AnyQueue, QueueError};

pub struct RedisQueue<T> {
    client: redis::Client,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RedisQueue<T> {
    pub fn new(client: redis::Client, key: impl Into<String>) -> Self {
        Self { client, key: key.into(), _marker: PhantomData }
    }
}

#[async_trait]
impl<T> AnyQueue<T> for RedisQueue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn put(&self, item: T, _timeout: Option<Duration>) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&item)?;
        let _: () = conn.lpush(&self.key, payload).await?;
        Ok(())
    }

    async fn get(&self, timeout: Option<Duration>) -> Result<Option<T>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // BRPOP 0 blocks indefinitely; a `None` timeout here maps to a minimal poll instead,
        // matching the "return immediately if nothing is available" contract.
        let secs = timeout.map(|d| d.as_secs_f64().max(0.01)).unwrap_or(0.01);
        let reply: Option<(String, String)> = conn.brpop(&self.key, secs).await?;
        match reply {
            Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn is_process_safe(&self) -> bool {
        true
    }
}
