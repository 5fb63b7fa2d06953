//! Capability adapters: the narrow async traits the mail tasks are written against,
//! plus the concrete implementations backed by this crate's own IMAP/SMTP/SASL stack.

pub mod chat_model;
pub mod imap_capability;
pub mod smtp_capability;

pub use chat_model::{ChatModel, ChatModelError, EchoChatModel};
pub use imap_capability::{connect as connect_imap, FetchQuery, ImapCapabilityError, ImapClientSession, ImapSession, RawMessage};
pub use smtp_capability::{SmtpCapabilityError, SmtpClientSession, SmtpSession};
