//! Application assembly: turn configuration into running fetch/reply/send pipelines.
//!
//! The executor and queue variants are validated against each other here (thread-pool
//! pairs with the in-process queue, process-pool pairs with the cross-process queue)
//! since nothing downstream can recover from a mismatch — a cross-process queue shared
//! by tasks that assume in-process memory semantics would silently lose messages.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::bot::Bot;
use crate::capability::EchoChatModel;
use crate::config::{BotSpec, ConfigError, ImapConfig, SecurityConfig, SmtpConfig};
use crate::executor::{WorkerPool, WorkerPoolConfig, WorkerType};
use crate::mail::{FetchTask, ImapClientConnector, ReplyTask, SendTask, SmtpClientConnector};
use crate::message::Message;
use crate::queue::{AnyQueue, MemoryQueue, QueueConfig, QueueError, RedisQueue};
use crate::runtask::{Runner, RunnerError};
use crate::security::SecurityFilter;

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("at least one bot must be configured")]
    NoBots,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("queue backend does not match worker pool variant: {0}")]
    QueueExecutorMismatch(&'static str),
    #[error("redis queue backend error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("fetch task failed: {0}")]
    Fetch(String),
    #[error("reply task failed: {0}")]
    Reply(String),
    #[error("send task failed: {0}")]
    Send(String),
}

pub struct AppConfig {
    pub bots: Vec<BotSpec>,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub worker_pool: WorkerPoolConfig,
    pub incoming_queue: QueueConfig,
    pub outgoing_queue: QueueConfig,
    pub ehlo_hostname: String,
    pub queue_get_timeout: Duration,
    pub reply_retry_backoff: Duration,
}

fn build_queue(config: &QueueConfig) -> Result<Arc<dyn AnyQueue<Message>>, AssemblyError> {
    match config {
        QueueConfig::Memory { max_size, .. } => Ok(Arc::new(MemoryQueue::new(*max_size))),
        QueueConfig::Redis { host, port, db, username, password, key, .. } => {
            let url = match (username, password) {
                (Some(u), Some(p)) => format!("redis://{}:{}@{}:{}/{}", u, p.expose(), host, port, db),
                _ => format!("redis://{}:{}/{}", host, port, db),
            };
            let client = redis::Client::open(url)?;
            Ok(Arc::new(RedisQueue::new(client, key.clone())))
        }
    }
}

fn queue_matches_executor(config: &QueueConfig, worker_type: WorkerType) -> bool {
    match (config, worker_type) {
        (QueueConfig::Memory { .. }, WorkerType::Thread) => true,
        (QueueConfig::Redis { .. }, WorkerType::Process) => true,
        _ => false,
    }
}

/// Validate configuration, build the three pipeline tasks, start them, and wait for
/// all three to finish. Returns once the first task reaches a terminal state.
pub async fn run_app(config: AppConfig) -> Result<(), AssemblyError> {
    if config.bots.is_empty() {
        return Err(AssemblyError::NoBots);
    }
    config.imap.validate()?;
    config.smtp.validate()?;
    let bots: Vec<Bot> = config
        .bots
        .into_iter()
        .map(Bot::new)
        .collect::<Result<_, _>>()?;

    // The worker pool bounds any synchronous offloaded work; the IMAP/SMTP/chat-model
    // capability adapters used here are already fully async, so nothing is submitted
    // to it today. It is still constructed and validated against the queue variant per
    // the application-assembly contract, so a future synchronous capability (e.g. a
    // CPU-bound chat model) has a pool ready to use without touching this function.
    let worker_pool = WorkerPool::new(config.worker_pool.clone());

    if !queue_matches_executor(&config.incoming_queue, worker_pool.worker_type()) {
        return Err(AssemblyError::QueueExecutorMismatch("incoming queue"));
    }
    if !queue_matches_executor(&config.outgoing_queue, worker_pool.worker_type()) {
        return Err(AssemblyError::QueueExecutorMismatch("outgoing queue"));
    }

    let incoming = build_queue(&config.incoming_queue)?;
    let outgoing = build_queue(&config.outgoing_queue)?;

    let filter = Arc::new(SecurityFilter::from_config(&config.security)?);
    let chat_model = Arc::new(EchoChatModel);

    let imap_connector: Box<dyn crate::mail::ImapConnector> =
        Box::new(ImapClientConnector { config: config.imap.clone() });
    let fetch_task = FetchTask::new(
        imap_connector,
        config.imap.on_fetch,
        config.imap.fetch_max,
        config.imap.fetch_max_age_days,
        filter,
        incoming.clone(),
        config.queue_get_timeout,
    );

    let reply_task = ReplyTask::new(
        incoming,
        outgoing.clone(),
        bots,
        chat_model,
        config.queue_get_timeout,
        config.reply_retry_backoff,
    );

    let smtp_connector: Box<dyn crate::mail::SmtpConnector> = Box::new(SmtpClientConnector {
        config: config.smtp.clone(),
        ehlo_hostname: config.ehlo_hostname.clone(),
    });
    let send_task = SendTask::new(outgoing, smtp_connector, config.queue_get_timeout);

    let mut fetch_runner = Runner::new(fetch_task);
    let mut reply_runner = Runner::new(reply_task);
    let mut send_runner = Runner::new(send_task);

    fetch_runner
        .start(Some(Duration::from_secs(config.imap.fetch_interval_secs)))
        .await
        .map_err(|e| AssemblyError::Fetch(e.to_string()))?;
    reply_runner.start(None).await.map_err(|e| AssemblyError::Reply(e.to_string()))?;
    send_runner.start(None).await.map_err(|e| AssemblyError::Send(e.to_string()))?;

    info!("mail pipeline started");

    let (fetch_result, reply_result, send_result) =
        tokio::join!(fetch_runner.result(), reply_runner.result(), send_runner.result());

    map_runner_result(fetch_result, AssemblyError::Fetch)?;
    map_runner_result(reply_result, AssemblyError::Reply)?;
    map_runner_result(send_result, AssemblyError::Send)?;
    Ok(())
}

fn map_runner_result<T, E: std::error::Error>(
    result: Result<T, RunnerError<E>>,
    wrap: impl FnOnce(String) -> AssemblyError,
) -> Result<(), AssemblyError> {
    match result {
        Ok(_) => Ok(()),
        Err(RunnerError::Stopped) | Err(RunnerError::Cancelled) => Ok(()),
        Err(e) => Err(wrap(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_executor_matching_pairs() {
        let mem = QueueConfig::Memory { max_size: 0, timeout_secs: 5 };
        let redis = QueueConfig::Redis {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            username: None,
            password: None,
            key: "q".to_string(),
            timeout_secs: 5,
        };
        assert!(queue_matches_executor(&mem, WorkerType::Thread));
        assert!(!queue_matches_executor(&mem, WorkerType::Process));
        assert!(queue_matches_executor(&redis, WorkerType::Process));
        assert!(!queue_matches_executor(&redis, WorkerType::Thread));
    }
}
