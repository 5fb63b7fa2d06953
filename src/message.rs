//! Canonical pipeline message: parsed from raw fetched bytes, or built as a reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, FixedOffset, Utc};

use crate::mime::{
    extract_display_body, format_mailbox, parse_envelope, ContentID, EmailAddress, MessageHandler,
    MessageParser, MimeHandler, MimeParseError,
};
use crate::store::{Address, DateTime as WireDateTime, Envelope};

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message has no From address")]
    MissingFrom,
    #[error(transparent)]
    Parse(#[from] MimeParseError),
}

/// An immutable (after fetch) pipeline message. Raw bytes are carried for downstream
/// authentication checks (e.g. a future DKIM verifier) that this crate does not implement.
#[derive(Debug, Clone)]
pub struct Message {
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub body: String,
    pub sent_at: Option<DateTime<FixedOffset>>,
    pub uid: Option<u32>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub raw: Vec<u8>,
}

/// Collects In-Reply-To and References as two distinct fields, rather than merging
/// them into one ordered list the way a display-threading view would want.
#[derive(Default)]
struct ReplyHeaderCollector {
    in_reply_to: Option<String>,
    references: Vec<String>,
}

fn content_id_to_string(c: &ContentID) -> String {
    format!("<{}@{}>", c.get_local_part(), c.get_domain())
}

impl MessageHandler for ReplyHeaderCollector {
    fn message_id_header(&mut self, name: &str, ids: &[ContentID]) -> Result<(), MimeParseError> {
        if name.eq_ignore_ascii_case("in-reply-to") {
            if let Some(id) = ids.first() {
                self.in_reply_to = Some(content_id_to_string(id));
            }
        } else if name.eq_ignore_ascii_case("references") {
            self.references = ids.iter().map(content_id_to_string).collect();
        }
        Ok(())
    }
}

impl MimeHandler for ReplyHeaderCollector {}

fn parse_reply_headers(raw: &[u8]) -> Result<ReplyHeaderCollector, MimeParseError> {
    let collector = ReplyHeaderCollector::default();
    let mut parser = MessageParser::new(collector);
    parser.receive(raw)?;
    parser.close()?;
    Ok(parser.into_inner())
}

impl Message {
    /// Parse a fetched raw message into the canonical pipeline form.
    /// `uid` is the server-assigned handle for the fetched message, if any.
    pub fn parse_fetched(uid: Option<u32>, raw: Vec<u8>) -> Result<Self, MessageError> {
        let envelope = parse_envelope(&raw)?;
        let reply_headers = parse_reply_headers(&raw)?;
        let (_html, plain) = extract_display_body(&raw)?;

        let from = envelope.from.into_iter().next().ok_or(MessageError::MissingFrom)?;

        Ok(Message {
            from,
            to: envelope.to,
            subject: envelope.subject.unwrap_or_default(),
            body: plain.unwrap_or_default(),
            sent_at: envelope.date,
            uid,
            message_id: envelope.message_id.as_ref().map(content_id_to_string),
            in_reply_to: reply_headers.in_reply_to,
            references: reply_headers.references,
            raw,
        })
    }

    /// Build the reply Message per the Re:/quoting rules: `from` = bot address, `to` = original
    /// sender, subject prefixed with "Re: " unless already so prefixed (case-insensitive),
    /// in_reply_to = this message's message_id, references = this message's references with
    /// this message's message_id appended (if present and not already last).
    pub fn reply(&self, from: EmailAddress, body: String) -> Message {
        let subject = prefix_re(&self.subject);
        let mut references = self.references.clone();
        if let Some(mid) = &self.message_id {
            if references.last() != Some(mid) {
                references.push(mid.clone());
            }
        }
        let quoted = quote_original(&self.from, self.sent_at, &self.body);
        let full_body = format!("{}{}", body, quoted);
        let reply_message_id = generate_message_id(from.domain());

        Message {
            from,
            to: vec![self.from.clone()],
            subject,
            body: full_body,
            sent_at: None,
            uid: None,
            message_id: Some(reply_message_id),
            in_reply_to: self.message_id.clone(),
            references,
            raw: Vec::new(),
        }
    }

    /// Render this message to RFC 5322 / MIME bytes plus the SMTP envelope.
    pub fn render(&self) -> (Vec<u8>, Envelope) {
        render_message(self)
    }
}

fn prefix_re(subject: &str) -> String {
    let trimmed = subject.trim_start();
    if trimmed.len() >= 3 && trimmed[..3].eq_ignore_ascii_case("re:") {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}

fn quote_original(sender: &EmailAddress, sent_at: Option<DateTime<FixedOffset>>, body: &str) -> String {
    let when = sent_at
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let mut out = String::new();
    out.push_str("\n\n");
    out.push_str(&format!("{} said at {}:", sender, when));
    out.push_str("\n\n");
    for line in body.lines() {
        out.push_str("> ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

static MESSAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_message_id(domain: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let n = MESSAGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("<{:x}.{:x}@{}>", nanos, n, domain)
}

fn address_from(a: &EmailAddress) -> Address {
    Address {
        display_name: a.display_name().map(|s| s.to_string()),
        local_part: a.local_part().to_string(),
        domain: Some(a.domain().to_string()),
    }
}

fn append_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn append_address_header(out: &mut Vec<u8>, name: &str, addrs: &[EmailAddress]) {
    if addrs.is_empty() {
        return;
    }
    let values: Vec<String> = addrs
        .iter()
        .map(|a| format_mailbox(a.display_name(), a.local_part(), a.domain()))
        .collect();
    append_header(out, name, &values.join(", "));
}

/// Build RFC 5322 bytes and the SMTP envelope for an outgoing message. Grounded on the
/// header-folding and address-formatting helpers in `protocol::smtp::build_mime`, extended
/// with Message-ID/In-Reply-To/References, which plain SendPayload rendering doesn't carry.
fn render_message(message: &Message) -> (Vec<u8>, Envelope) {
    let mut out = Vec::new();
    append_address_header(&mut out, "From", std::slice::from_ref(&message.from));
    append_address_header(&mut out, "To", &message.to);
    if let Some(mid) = &message.message_id {
        append_header(&mut out, "Message-ID", mid);
    }
    if let Some(irt) = &message.in_reply_to {
        append_header(&mut out, "In-Reply-To", irt);
    }
    if !message.references.is_empty() {
        append_header(&mut out, "References", &message.references.join(" "));
    }
    append_header(&mut out, "Subject", &message.subject);
    let now = Utc::now();
    let fixed = now.with_timezone(&FixedOffset::east_opt(0).unwrap());
    append_header(&mut out, "Date", &fixed.to_rfc2822());
    append_header(&mut out, "MIME-Version", "1.0");
    append_header(&mut out, "Content-Type", "text/plain; charset=utf-8");
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(message.body.as_bytes());

    let envelope = Envelope {
        from: vec![address_from(&message.from)],
        to: message.to.iter().map(address_from).collect(),
        cc: Vec::new(),
        date: Some(WireDateTime {
            timestamp: fixed.timestamp(),
            tz_offset_secs: Some(fixed.offset().local_minus_utc()),
        }),
        subject: Some(message.subject.clone()),
        message_id: message.message_id.clone(),
    };
    (out, envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_message() -> Vec<u8> {
        b"From: Alice <alice@example.com>\r\nTo: bot@host.com\r\nSubject: hi\r\nMessage-ID: <1@x>\r\nDate: Fri, 21 Nov 1997 09:55:06 -0600\r\n\r\nhello".to_vec()
    }

    #[test]
    fn parses_fetched_message() {
        let m = Message::parse_fetched(Some(42), raw_message()).unwrap();
        assert_eq!(m.from.address(), "alice@example.com");
        assert_eq!(m.to.len(), 1);
        assert_eq!(m.subject, "hi");
        assert_eq!(m.body, "hello");
        assert_eq!(m.uid, Some(42));
        assert_eq!(m.message_id.as_deref(), Some("<1@x>"));
    }

    #[test]
    fn reply_prefixes_subject_and_quotes_body() {
        let m = Message::parse_fetched(Some(1), raw_message()).unwrap();
        let bot = EmailAddress::new(None::<String>, "bot", "host.com");
        let r = m.reply(bot, "Hi back".to_string());
        assert_eq!(r.subject, "Re: hi");
        assert_eq!(r.to[0].address(), "alice@example.com");
        assert_eq!(r.in_reply_to.as_deref(), Some("<1@x>"));
        assert!(r.body.starts_with("Hi back"));
        assert!(r.body.contains("> hello"));
    }

    #[test]
    fn reply_does_not_double_prefix() {
        let mut m = Message::parse_fetched(Some(1), raw_message()).unwrap();
        m.subject = "re: hi".to_string();
        let bot = EmailAddress::new(None::<String>, "bot", "host.com");
        let r = m.reply(bot, "ok".to_string());
        assert_eq!(r.subject, "re: hi");
    }

    #[test]
    fn reply_does_not_double_prefix_on_bare_re() {
        let mut m = Message::parse_fetched(Some(1), raw_message()).unwrap();
        m.subject = "re:".to_string();
        let bot = EmailAddress::new(None::<String>, "bot", "host.com");
        let r = m.reply(bot, "ok".to_string());
        assert_eq!(r.subject, "re:");
    }
}
