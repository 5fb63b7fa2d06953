//! Reply task: pull a fetched message off the incoming queue, resolve which bot it
//! addresses, ask the chat model for reply text, and enqueue the outgoing reply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::bot::Bot;
use crate::capability::chat_model::ChatModel;
use crate::message::Message;
use crate::queue::{AnyQueue, QueueError};
use crate::runtask::{StepOutcome, Task};

#[derive(Debug, thiserror::Error)]
pub enum ReplyTaskError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct ReplyTask {
    incoming: Arc<dyn AnyQueue<Message>>,
    outgoing: Arc<dyn AnyQueue<Message>>,
    bots: Vec<Bot>,
    chat_model: Arc<dyn ChatModel>,
    queue_timeout: Duration,
    retry_backoff: Duration,
}

impl ReplyTask {
    pub fn new(
        incoming: Arc<dyn AnyQueue<Message>>,
        outgoing: Arc<dyn AnyQueue<Message>>,
        bots: Vec<Bot>,
        chat_model: Arc<dyn ChatModel>,
        queue_timeout: Duration,
        retry_backoff: Duration,
    ) -> Self {
        Self { incoming, outgoing, bots, chat_model, queue_timeout, retry_backoff }
    }

    fn resolve_bot(&self, message: &Message) -> Option<&Bot> {
        let recipient = message.to.first()?;
        self.bots.iter().find(|bot| bot.matches(recipient))
    }
}

#[async_trait]
impl Task for ReplyTask {
    type Output = ();
    type Error = ReplyTaskError;

    async fn step(&mut self) -> StepOutcome<Self::Output, Self::Error> {
        let message = match self.incoming.get(Some(self.queue_timeout)).await {
            Ok(Some(m)) => m,
            Ok(None) => return StepOutcome::Continue,
            Err(e) => return StepOutcome::Raised(ReplyTaskError::Queue(e)),
        };

        let bot = match self.resolve_bot(&message) {
            Some(bot) => bot,
            None => {
                warn!("no bot addresses this message, dropping");
                return StepOutcome::Continue;
            }
        };

        let reply_from = match bot.address_for_reply() {
            Some(addr) => addr,
            None => {
                warn!(bot = %bot.spec.name, "bot has no literal address to reply from, dropping");
                return StepOutcome::Continue;
            }
        };

        let truncated_body: String = message.body.chars().take(bot.spec.max_input_length).collect();
        let user_text = format!("From: {}\nSubject: {}\n\n{}", message.from, message.subject, truncated_body);

        let attempts = bot.spec.retries + 1;
        let mut reply_text = None;
        for attempt in 0..attempts {
            match self
                .chat_model
                .compose(&bot.spec.system_prompt, &user_text, &bot.spec.chat_model_params)
                .await
            {
                Ok(text) => {
                    reply_text = Some(text);
                    break;
                }
                Err(e) => {
                    warn!(bot = %bot.spec.name, attempt, error = %e, "chat model call failed");
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        let reply_text = match reply_text {
            Some(text) => text,
            None => {
                warn!(bot = %bot.spec.name, "exhausted retries composing a reply, dropping message");
                return StepOutcome::Continue;
            }
        };

        let reply = message.reply(reply_from, reply_text);
        if let Err(e) = self.outgoing.put(reply, Some(self.queue_timeout)).await {
            return StepOutcome::Raised(ReplyTaskError::Queue(e));
        }

        info!(bot = %bot.spec.name, "reply enqueued");
        StepOutcome::Continue
    }
}
