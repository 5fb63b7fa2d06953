//! Rate-limiting rules: a global counter, and a per-key (sender or domain) table
//! that purges expired entries periodically instead of on every check.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Rule, RuleResult, SecurityError};
use crate::message::Message;

struct Counter {
    n: u32,
    window_end: Instant,
}

pub struct RateLimitRule {
    limit: u32,
    window: Duration,
    counter: Mutex<Counter>,
}

impl RateLimitRule {
    pub fn new(limit: u32, window: Duration) -> Self {
        let now = Instant::now();
        Self { limit, window, counter: Mutex::new(Counter { n: 0, window_end: now + window }) }
    }
}

impl Rule for RateLimitRule {
    fn check(&self, _message: &mut Message) -> Result<RuleResult, SecurityError> {
        let now = Instant::now();
        let mut counter = self.counter.lock().expect("rate limit mutex poisoned");
        if now > counter.window_end {
            counter.n = 0;
            counter.window_end = now + self.window;
        }
        counter.n += 1;
        if counter.n > self.limit {
            Ok(RuleResult::block(format!("global rate limit exceeded ({}/{})", counter.n, self.limit)))
        } else {
            Ok(RuleResult::allow())
        }
    }

    fn name(&self) -> &'static str {
        "rate-limit-global"
    }
}

enum KeyKind {
    Sender,
    Domain,
}

struct KeyedTable {
    entries: HashMap<String, Counter>,
    next_purge: Instant,
}

/// Rate limit keyed by sender address or sender domain. Expired entries are purged
/// once per window rather than scanned on every check.
pub struct RateLimitPerKeyRule {
    key_kind: KeyKind,
    limit: u32,
    window: Duration,
    table: Mutex<KeyedTable>,
}

impl RateLimitPerKeyRule {
    pub fn per_sender(limit: u32, window: Duration) -> Self {
        Self::new(KeyKind::Sender, limit, window)
    }

    pub fn per_domain(limit: u32, window: Duration) -> Self {
        Self::new(KeyKind::Domain, limit, window)
    }

    fn new(key_kind: KeyKind, limit: u32, window: Duration) -> Self {
        let now = Instant::now();
        Self {
            key_kind,
            limit,
            window,
            table: Mutex::new(KeyedTable { entries: HashMap::new(), next_purge: now + window }),
        }
    }
}

impl Rule for RateLimitPerKeyRule {
    fn check(&self, message: &mut Message) -> Result<RuleResult, SecurityError> {
        let key = match self.key_kind {
            KeyKind::Sender => message.from.address().to_lowercase(),
            KeyKind::Domain => message.from.domain().to_lowercase(),
        };
        let now = Instant::now();
        let mut table = self.table.lock().expect("rate limit mutex poisoned");
        if now > table.next_purge {
            table.entries.retain(|_, c| c.window_end >= now);
            table.next_purge = now + self.window;
        }
        let window = self.window;
        let counter = table
            .entries
            .entry(key.clone())
            .or_insert_with(|| Counter { n: 0, window_end: now + window });
        if now > counter.window_end {
            counter.n = 0;
            counter.window_end = now + window;
        }
        counter.n += 1;
        if counter.n > self.limit {
            Ok(RuleResult::block(format!("rate limit exceeded for {}: {}/{}", key, counter.n, self.limit)))
        } else {
            Ok(RuleResult::allow())
        }
    }

    fn name(&self) -> &'static str {
        match self.key_kind {
            KeyKind::Sender => "rate-limit-per-sender",
            KeyKind::Domain => "rate-limit-per-domain",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str) -> Message {
        let (local, domain) = from.split_once('@').unwrap();
        Message {
            from: crate::mime::EmailAddress::new(None::<String>, local, domain),
            to: Vec::new(),
            subject: String::new(),
            body: String::new(),
            sent_at: None,
            uid: None,
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            raw: Vec::new(),
        }
    }

    #[test]
    fn global_limit_blocks_after_threshold() {
        let rule = RateLimitRule::new(2, Duration::from_secs(60));
        let mut a = msg("a@x.com");
        let mut b = msg("b@x.com");
        let mut c = msg("c@x.com");
        assert_eq!(rule.check(&mut a).unwrap().action, super::super::Action::Allow);
        assert_eq!(rule.check(&mut b).unwrap().action, super::super::Action::Allow);
        assert_eq!(rule.check(&mut c).unwrap().action, super::super::Action::Block);
    }

    #[test]
    fn per_sender_limit_is_independent_per_key() {
        let rule = RateLimitPerKeyRule::per_sender(1, Duration::from_secs(60));
        let mut a1 = msg("a@x.com");
        let mut a2 = msg("a@x.com");
        let mut b1 = msg("b@x.com");
        assert_eq!(rule.check(&mut a1).unwrap().action, super::super::Action::Allow);
        assert_eq!(rule.check(&mut a2).unwrap().action, super::super::Action::Block);
        assert_eq!(rule.check(&mut b1).unwrap().action, super::super::Action::Allow);
    }

    /// Once the window elapses the global counter resets, rather than blocking forever.
    #[test]
    fn global_limit_resets_once_window_elapses() {
        let rule = RateLimitRule::new(1, Duration::from_millis(30));
        let mut a = msg("a@x.com");
        let mut b = msg("b@x.com");
        let mut c = msg("c@x.com");
        assert_eq!(rule.check(&mut a).unwrap().action, super::super::Action::Allow);
        assert_eq!(rule.check(&mut b).unwrap().action, super::super::Action::Block);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(rule.check(&mut c).unwrap().action, super::super::Action::Allow);
    }

    /// The per-key table purges expired entries in bulk on the next check past
    /// `next_purge`, rather than retaining one `Counter` per sender ever seen.
    #[test]
    fn per_sender_table_purges_expired_entries_at_scale() {
        let rule = RateLimitPerKeyRule::per_sender(10, Duration::from_millis(200));
        for i in 0..500 {
            let mut m = msg(&format!("user{i}@x.com"));
            rule.check(&mut m).unwrap();
        }
        {
            let table = rule.table.lock().unwrap();
            assert_eq!(table.entries.len(), 500);
        }
        std::thread::sleep(Duration::from_millis(250));
        let mut fresh = msg("fresh@x.com");
        rule.check(&mut fresh).unwrap();
        let table = rule.table.lock().unwrap();
        assert_eq!(
            table.entries.len(),
            1,
            "expired entries must be purged once `next_purge` elapses, not retained indefinitely"
        );
    }
}
