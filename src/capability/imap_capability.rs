//! IMAP capability: the narrow view mail tasks need onto a mailbox, backed by
//! `protocol::imap`'s tagged-command client.

use async_trait::async_trait;

use crate::config::{EncryptionMode, ImapConfig};
use crate::protocol::imap::{connect_and_authenticate, AuthenticatedSession, ImapClientError};
use crate::sasl::SaslMechanism;

#[derive(Debug, thiserror::Error)]
pub enum ImapCapabilityError {
    #[error(transparent)]
    Client(#[from] ImapClientError),
}

/// What to fetch: whether to restrict to unread messages. Age filtering against
/// `max_age_days` happens downstream, once a message's Date header is parsed --
/// this client has no IMAP SEARCH support, only ranged FETCH.
#[derive(Debug, Clone)]
pub struct FetchQuery {
    pub max_age_days: u32,
    pub unseen_only: bool,
}

/// One candidate message pulled off the mailbox: its UID and full RFC 5322 bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ImapSession: Send {
    async fn fetch(&mut self, query: &FetchQuery, limit: u32) -> Result<Vec<RawMessage>, ImapCapabilityError>;
    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapCapabilityError>;
    async fn delete(&mut self, uid: u32) -> Result<(), ImapCapabilityError>;
    async fn close(self: Box<Self>) -> Result<(), ImapCapabilityError>;
}

/// Connect, authenticate and SELECT INBOX.
pub async fn connect(config: &ImapConfig) -> Result<ImapClientSession, ImapCapabilityError> {
    let (implicit_tls, starttls) = encryption_flags(config.resolved_encryption());
    let mut inner = connect_and_authenticate(
        &config.host,
        config.port,
        implicit_tls,
        starttls,
        Some((&config.username, config.password.expose(), SaslMechanism::Plain)),
    )
    .await?;
    inner.select("INBOX").await?;
    Ok(ImapClientSession { inner })
}

fn encryption_flags(mode: EncryptionMode) -> (bool, bool) {
    match mode {
        EncryptionMode::Tls => (true, false),
        EncryptionMode::StartTls => (false, true),
        EncryptionMode::None => (false, false),
    }
}

pub struct ImapClientSession {
    inner: AuthenticatedSession,
}

#[async_trait]
impl ImapSession for ImapClientSession {
    async fn fetch(&mut self, query: &FetchQuery, limit: u32) -> Result<Vec<RawMessage>, ImapCapabilityError> {
        let select = self.inner.select("INBOX").await?;
        if select.exists == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let batch = limit.min(select.exists);
        let start = select.exists - batch + 1;
        let summaries = self.inner.fetch_summaries(start, select.exists).await?;

        let mut out = Vec::new();
        for summary in summaries {
            if query.unseen_only && summary.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen")) {
                continue;
            }
            let body = self.inner.fetch_body_by_uid(summary.uid).await?;
            out.push(RawMessage { uid: summary.uid, bytes: body });
            if out.len() as u32 >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), ImapCapabilityError> {
        self.inner.mark_seen(uid).await?;
        Ok(())
    }

    async fn delete(&mut self, uid: u32) -> Result<(), ImapCapabilityError> {
        self.inner.delete(uid).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ImapCapabilityError> {
        Ok(())
    }
}
