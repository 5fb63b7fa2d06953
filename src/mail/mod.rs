//! The three pipeline tasks: fetch incoming mail, reply to it, send outgoing mail.

pub mod fetch;
pub mod reply;
pub mod send;

pub use fetch::{FetchTask, FetchTaskError, ImapClientConnector, ImapConnector};
pub use reply::{ReplyTask, ReplyTaskError};
pub use send::{SendTask, SendTaskError, SmtpClientConnector, SmtpConnector};
