//! Chat-model capability: the single call a reply task makes to turn a message into
//! reply text. Concrete LLM backends live outside this crate; `EchoChatModel` is a
//! deterministic stand-in for tests and local runs.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ChatModelError {
    #[error("chat model request failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn compose(&self, system_prompt: &str, user_text: &str, params: &Value) -> Result<String, ChatModelError>;
}

pub struct EchoChatModel;

#[async_trait]
impl ChatModel for EchoChatModel {
    async fn compose(&self, _system_prompt: &str, user_text: &str, _params: &Value) -> Result<String, ChatModelError> {
        Ok(format!("Echo: {}", user_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_model_returns_prefixed_input() {
        let model = EchoChatModel;
        let reply = model.compose("be helpful", "hello", &Value::Null).await.unwrap();
        assert_eq!(reply, "Echo: hello");
    }
}
