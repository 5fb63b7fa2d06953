//! Send task: pull a reply off the outgoing queue and deliver it over SMTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::capability::smtp_capability::{SmtpCapabilityError, SmtpClientSession, SmtpSession};
use crate::config::SmtpConfig;
use crate::message::Message;
use crate::queue::{AnyQueue, QueueError};
use crate::runtask::{StepOutcome, Task};

#[derive(Debug, thiserror::Error)]
pub enum SendTaskError {
    #[error(transparent)]
    Smtp(#[from] SmtpCapabilityError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Produces a fresh `SmtpSession` each step, matching `send_message_async`'s one-shot
/// connect/send/quit contract.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    async fn connect(&self) -> Box<dyn SmtpSession>;
}

pub struct SmtpClientConnector {
    pub config: SmtpConfig,
    pub ehlo_hostname: String,
}

#[async_trait]
impl SmtpConnector for SmtpClientConnector {
    async fn connect(&self) -> Box<dyn SmtpSession> {
        Box::new(SmtpClientSession::new(self.config.clone(), self.ehlo_hostname.clone()))
    }
}

pub struct SendTask {
    outgoing: Arc<dyn AnyQueue<Message>>,
    connector: Box<dyn SmtpConnector>,
    queue_timeout: Duration,
}

impl SendTask {
    pub fn new(
        outgoing: Arc<dyn AnyQueue<Message>>,
        connector: Box<dyn SmtpConnector>,
        queue_timeout: Duration,
    ) -> Self {
        Self { outgoing, connector, queue_timeout }
    }
}

#[async_trait]
impl Task for SendTask {
    type Output = ();
    type Error = SendTaskError;

    async fn step(&mut self) -> StepOutcome<Self::Output, Self::Error> {
        let message = match self.outgoing.get(Some(self.queue_timeout)).await {
            Ok(Some(m)) => m,
            Ok(None) => return StepOutcome::Continue,
            Err(e) => return StepOutcome::Raised(SendTaskError::Queue(e)),
        };

        let (bytes, envelope) = message.render();
        let mut session = self.connector.connect().await;

        if let Err(e) = session.send(&envelope, &bytes).await {
            let _ = session.close().await;
            return StepOutcome::Raised(SendTaskError::Smtp(e));
        }
        if let Err(e) = session.close().await {
            return StepOutcome::Raised(SendTaskError::Smtp(e));
        }

        info!(to = ?envelope.to.iter().map(|a| a.local_part.clone()).collect::<Vec<_>>(), "message sent");
        StepOutcome::Continue
    }
}
