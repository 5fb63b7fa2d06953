//! Integration tests exercising the fetch -> filter -> reply pipeline end to end,
//! against mock IMAP/chat-model capabilities rather than real servers.

use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mailbot_core::bot::Bot;
use mailbot_core::capability::{
    ChatModel, ChatModelError, FetchQuery, ImapCapabilityError, ImapSession, RawMessage,
};
use mailbot_core::config::{BotSpec, FilterMode, SecurityConfig};
use mailbot_core::mail::{FetchTask, ImapConnector, ReplyTask};
use mailbot_core::message::Message;
use mailbot_core::queue::{AnyQueue, MemoryQueue};
use mailbot_core::runtask::{Runner, Task};
use mailbot_core::security::SecurityFilter;

static TRACING_INIT: Once = Once::new();

/// Every `#[tokio::test]` in this binary shares one process, so the global subscriber
/// can only be installed once; later calls after the first are no-ops.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

fn raw_message(from: &str, to: &str, subject: &str, body: &str, message_id: &str) -> Vec<u8> {
    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nMessage-ID: {}\r\nDate: Fri, 21 Nov 1997 09:55:06 -0600\r\n\r\n{}",
        from, to, subject, message_id, body
    )
    .into_bytes()
}

struct MockImapSession {
    messages: Vec<RawMessage>,
}

#[async_trait]
impl ImapSession for MockImapSession {
    async fn fetch(&mut self, _query: &FetchQuery, limit: u32) -> Result<Vec<RawMessage>, ImapCapabilityError> {
        Ok(self.messages.drain(..).take(limit as usize).collect())
    }
    async fn mark_seen(&mut self, _uid: u32) -> Result<(), ImapCapabilityError> {
        Ok(())
    }
    async fn delete(&mut self, _uid: u32) -> Result<(), ImapCapabilityError> {
        Ok(())
    }
    async fn close(self: Box<Self>) -> Result<(), ImapCapabilityError> {
        Ok(())
    }
}

/// Hands out the preloaded batch on the first connect, nothing on subsequent ones.
struct MockImapConnector {
    messages: std::sync::Mutex<Vec<RawMessage>>,
}

#[async_trait]
impl ImapConnector for MockImapConnector {
    async fn connect(&self) -> Result<Box<dyn ImapSession>, ImapCapabilityError> {
        let messages = std::mem::take(&mut *self.messages.lock().unwrap());
        Ok(Box::new(MockImapSession { messages }))
    }
}

struct FixedChatModel(String);

#[async_trait]
impl ChatModel for FixedChatModel {
    async fn compose(&self, _system_prompt: &str, _user_text: &str, _params: &Value) -> Result<String, ChatModelError> {
        Ok(self.0.clone())
    }
}

/// Scenario: IMAP returns one message from a denylisted domain. It must never reach
/// the incoming queue.
#[tokio::test]
async fn fetch_filter_drop() {
    init_tracing();
    let raw = raw_message("spam@x.com", "bot@h.com", "buy now", "click here", "<1@x.com>");
    let connector = MockImapConnector { messages: std::sync::Mutex::new(vec![RawMessage { uid: 1, bytes: raw }]) };

    let security = SecurityConfig {
        secret_key: None,
        filter_mode: Some(FilterMode::Denylist),
        filter_addresses: vec!["*@x.com".to_string()],
        rate_limit: None,
        rate_limit_per_sender: None,
        rate_limit_per_domain: None,
    };
    let filter = Arc::new(SecurityFilter::from_config(&security).unwrap());
    let incoming: Arc<dyn AnyQueue<Message>> = Arc::new(MemoryQueue::new(0));

    let mut task = FetchTask::new(
        Box::new(connector),
        mailbot_core::config::OnFetch::MarkRead,
        10,
        30,
        filter,
        incoming.clone(),
        Duration::from_millis(100),
    );
    task.step().await;

    let item = incoming.get(None).await.unwrap();
    assert!(item.is_none(), "blocked message must not reach the incoming queue");
}

/// Scenario: a message to a known bot flows through fetch and reply, producing a
/// correctly quoted, correctly headered reply on the outgoing queue.
#[tokio::test]
async fn end_to_end_reply() {
    init_tracing();
    let raw = raw_message("u@ok.com", "bot@h.com", "hi", "hello", "<1@x>");
    let connector = MockImapConnector { messages: std::sync::Mutex::new(vec![RawMessage { uid: 1, bytes: raw }]) };

    let filter = Arc::new(SecurityFilter::builder().build());
    let incoming: Arc<dyn AnyQueue<Message>> = Arc::new(MemoryQueue::new(0));
    let outgoing: Arc<dyn AnyQueue<Message>> = Arc::new(MemoryQueue::new(0));

    let mut fetch_task = FetchTask::new(
        Box::new(connector),
        mailbot_core::config::OnFetch::MarkRead,
        10,
        30,
        filter,
        incoming.clone(),
        Duration::from_millis(100),
    );
    fetch_task.step().await;

    let bot_spec = BotSpec {
        name: "helper".to_string(),
        address: Some("bot@h.com".to_string()),
        address_regex: None,
        max_input_length: 5000,
        system_prompt: "be helpful".to_string(),
        chat_model_params: Value::Null,
        retries: 3,
    };
    let bots = vec![Bot::new(bot_spec).unwrap()];
    let chat_model = Arc::new(FixedChatModel("Hi back".to_string()));

    let mut reply_task = ReplyTask::new(
        incoming,
        outgoing.clone(),
        bots,
        chat_model,
        Duration::from_millis(100),
        Duration::from_millis(10),
    );
    reply_task.step().await;

    let reply = outgoing.get(None).await.unwrap().expect("a reply should have been enqueued");
    assert_eq!(reply.from.address(), "bot@h.com");
    assert_eq!(reply.to.len(), 1);
    assert_eq!(reply.to[0].address(), "u@ok.com");
    assert_eq!(reply.subject, "Re: hi");
    assert_eq!(reply.in_reply_to.as_deref(), Some("<1@x>"));
    assert!(reply.body.starts_with("Hi back"));
    assert!(reply.body.contains("> hello"));
}

/// A runner that has been stopped performs at most one more step after the request.
#[tokio::test]
async fn runner_stop_is_observed_promptly() {
    init_tracing();
    struct CountingTask(Arc<std::sync::atomic::AtomicU32>);

    #[async_trait]
    impl Task for CountingTask {
        type Output = ();
        type Error = std::convert::Infallible;

        async fn step(&mut self) -> mailbot_core::runtask::StepOutcome<Self::Output, Self::Error> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            mailbot_core::runtask::StepOutcome::Continue
        }
    }

    let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let mut runner = Runner::new(CountingTask(count.clone()));
    runner.start(Some(Duration::from_millis(20))).await.unwrap();
    runner.stop();
    let _ = runner.result().await;
    let seen = count.load(std::sync::atomic::Ordering::SeqCst);
    assert!(seen >= 1);
}

/// A connector whose `connect` takes a while, standing in for a slow IMAP round trip.
struct SlowImapConnector {
    connects_completed: Arc<std::sync::atomic::AtomicU32>,
    delay: Duration,
}

#[async_trait]
impl ImapConnector for SlowImapConnector {
    async fn connect(&self) -> Result<Box<dyn ImapSession>, ImapCapabilityError> {
        tokio::time::sleep(self.delay).await;
        self.connects_completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Box::new(MockImapSession { messages: Vec::new() }))
    }
}

/// Cancelling mid-fetch does not preempt the in-flight step -- it runs to completion
/// -- but the runner still reaches `Cancelled` promptly afterward, and `result()`
/// resolves instead of hanging, meaning the driver task exits rather than leaking.
#[tokio::test]
async fn cancel_mid_fetch_lets_step_finish_then_stops_promptly() {
    init_tracing();
    let connects_completed = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let connector = SlowImapConnector { connects_completed: connects_completed.clone(), delay: Duration::from_millis(80) };
    let filter = Arc::new(SecurityFilter::builder().build());
    let incoming: Arc<dyn AnyQueue<Message>> = Arc::new(MemoryQueue::new(0));

    let task = FetchTask::new(
        Box::new(connector),
        mailbot_core::config::OnFetch::MarkRead,
        10,
        30,
        filter,
        incoming,
        Duration::from_millis(100),
    );

    let mut runner = Runner::new(task);
    runner.start(Some(Duration::from_secs(60))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    runner.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), runner.result())
        .await
        .expect("runner must reach a terminal state instead of hanging on a leaked driver task");
    assert!(matches!(result, Err(mailbot_core::runtask::RunnerError::Cancelled)));
    assert_eq!(
        connects_completed.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "the in-flight fetch step must run to completion rather than being preempted"
    );
}
