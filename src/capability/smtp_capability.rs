//! SMTP capability: a one-shot connect/send/close session, backed by `protocol::smtp`.

use async_trait::async_trait;

use crate::config::{EncryptionMode, SmtpConfig};
use crate::protocol::smtp::{send_message_async, SmtpClientError};
use crate::sasl::SaslMechanism;
use crate::store::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum SmtpCapabilityError {
    #[error(transparent)]
    Client(#[from] SmtpClientError),
}

#[async_trait]
pub trait SmtpSession: Send {
    async fn send(&mut self, envelope: &Envelope, message: &[u8]) -> Result<(), SmtpCapabilityError>;
    async fn close(self: Box<Self>) -> Result<(), SmtpCapabilityError>;
}

/// Each `send` call is its own connect -> EHLO/AUTH -> send -> QUIT round trip, matching
/// `send_message_async`'s one-shot contract.
pub struct SmtpClientSession {
    config: SmtpConfig,
    ehlo_hostname: String,
}

impl SmtpClientSession {
    pub fn new(config: SmtpConfig, ehlo_hostname: impl Into<String>) -> Self {
        Self { config, ehlo_hostname: ehlo_hostname.into() }
    }
}

#[async_trait]
impl SmtpSession for SmtpClientSession {
    async fn send(&mut self, envelope: &Envelope, message: &[u8]) -> Result<(), SmtpCapabilityError> {
        let (implicit_tls, starttls) = match self.config.resolved_encryption() {
            EncryptionMode::Tls => (true, false),
            EncryptionMode::StartTls => (false, true),
            EncryptionMode::None => (false, false),
        };
        send_message_async(
            &self.config.host,
            self.config.port,
            implicit_tls,
            starttls,
            Some((&self.config.username, self.config.password.expose(), SaslMechanism::Plain)),
            &self.ehlo_hostname,
            message,
            envelope,
        )
        .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), SmtpCapabilityError> {
        Ok(())
    }
}
