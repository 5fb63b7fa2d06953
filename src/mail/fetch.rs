//! Fetch task: pull candidate messages off the mailbox, run them through the
//! security filter, and enqueue the allowed ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::capability::imap_capability::{FetchQuery, ImapCapabilityError, ImapSession};
use crate::config::{ImapConfig, OnFetch};
use crate::message::Message;
use crate::queue::{AnyQueue, QueueError};
use crate::runtask::{StepOutcome, Task};
use crate::security::{Action, SecurityFilter};

#[derive(Debug, thiserror::Error)]
pub enum FetchTaskError {
    #[error(transparent)]
    Imap(#[from] ImapCapabilityError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Produces a fresh `ImapSession` each step, per the "connect, do the work, close on
/// every exit path" contract.
#[async_trait]
pub trait ImapConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ImapSession>, ImapCapabilityError>;
}

pub struct ImapClientConnector {
    pub config: ImapConfig,
}

#[async_trait]
impl ImapConnector for ImapClientConnector {
    async fn connect(&self) -> Result<Box<dyn ImapSession>, ImapCapabilityError> {
        let session = crate::capability::imap_capability::connect(&self.config).await?;
        Ok(Box::new(session))
    }
}

pub struct FetchTask {
    connector: Box<dyn ImapConnector>,
    on_fetch: OnFetch,
    fetch_max: u32,
    fetch_max_age_days: u32,
    filter: Arc<SecurityFilter>,
    incoming: Arc<dyn AnyQueue<Message>>,
    queue_timeout: Duration,
}

impl FetchTask {
    pub fn new(
        connector: Box<dyn ImapConnector>,
        on_fetch: OnFetch,
        fetch_max: u32,
        fetch_max_age_days: u32,
        filter: Arc<SecurityFilter>,
        incoming: Arc<dyn AnyQueue<Message>>,
        queue_timeout: Duration,
    ) -> Self {
        Self { connector, on_fetch, fetch_max, fetch_max_age_days, filter, incoming, queue_timeout }
    }
}

#[async_trait]
impl Task for FetchTask {
    type Output = ();
    type Error = FetchTaskError;

    async fn step(&mut self) -> StepOutcome<Self::Output, Self::Error> {
        let mut session = match self.connector.connect().await {
            Ok(s) => s,
            Err(e) => return StepOutcome::Raised(FetchTaskError::Imap(e)),
        };

        let query = FetchQuery {
            max_age_days: self.fetch_max_age_days,
            unseen_only: matches!(self.on_fetch, OnFetch::MarkRead),
        };

        let raws = match session.fetch(&query, self.fetch_max).await {
            Ok(r) => r,
            Err(e) => {
                let _ = session.close().await;
                return StepOutcome::Raised(FetchTaskError::Imap(e));
            }
        };

        let cutoff = Utc::now() - chrono::Duration::days(self.fetch_max_age_days as i64);
        let mut enqueued = 0u32;
        let mut skipped = 0u32;

        for raw in raws {
            let uid = raw.uid;
            let mut message = match Message::parse_fetched(Some(uid), raw.bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(uid, error = %e, "skipping unparseable message");
                    skipped += 1;
                    continue;
                }
            };

            let too_old = message
                .sent_at
                .map(|sent_at| sent_at.with_timezone(&Utc) < cutoff)
                .unwrap_or(false);

            if !too_old {
                let allowed = match self.filter.check(&mut message) {
                    Ok(result) => result.action == Action::Allow,
                    Err(e) => {
                        warn!(error = %e, "security filter failed, dropping message");
                        false
                    }
                };
                if allowed {
                    if let Err(e) = self.incoming.put(message, Some(self.queue_timeout)).await {
                        let _ = session.close().await;
                        return StepOutcome::Raised(FetchTaskError::Queue(e));
                    }
                    enqueued += 1;
                } else {
                    skipped += 1;
                }
            } else {
                skipped += 1;
            }

            match self.on_fetch {
                OnFetch::MarkRead => {
                    if let Err(e) = session.mark_seen(uid).await {
                        warn!(uid, error = %e, "failed to mark message seen, it may be re-fetched and re-replied to next poll");
                    }
                }
                OnFetch::Delete => {
                    // A failed delete leaves the message sitting in the mailbox to be
                    // re-fetched and re-replied to next poll, which is the exact
                    // double-reply this mode exists to prevent -- treat it as fatal.
                    if let Err(e) = session.delete(uid).await {
                        let _ = session.close().await;
                        return StepOutcome::Raised(FetchTaskError::Imap(e));
                    }
                }
            }
        }

        if let Err(e) = session.close().await {
            return StepOutcome::Raised(FetchTaskError::Imap(e));
        }

        info!(enqueued, skipped, "fetch step complete");
        StepOutcome::Continue
    }
}
