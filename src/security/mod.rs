//! Security filter: an ordered chain of rules applied to each fetched message before
//! it is handed to a bot. Any rule blocking the message short-circuits the chain.

mod rate_limit;

use std::time::Duration;

use tracing::info;

use crate::config::{ConfigError, SecurityConfig};
use crate::message::Message;

pub use rate_limit::{RateLimitPerKeyRule, RateLimitRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Block,
}

#[derive(Debug, Clone)]
pub struct RuleResult {
    pub action: Action,
    pub reason: Option<String>,
}

impl RuleResult {
    pub fn allow() -> Self {
        Self { action: Action::Allow, reason: None }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self { action: Action::Block, reason: Some(reason.into()) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("rule evaluation failed: {0}")]
    RuleFailed(String),
}

/// One link in the security filter chain. `check` may mutate the message (e.g. the
/// secret-key rule strips the key from the body before allowing it through).
pub trait Rule: Send + Sync {
    fn check(&self, message: &mut Message) -> Result<RuleResult, SecurityError>;
    fn name(&self) -> &'static str;
}

pub struct AllowAllRule;

impl Rule for AllowAllRule {
    fn check(&self, _message: &mut Message) -> Result<RuleResult, SecurityError> {
        Ok(RuleResult::allow())
    }

    fn name(&self) -> &'static str {
        "allow-all"
    }
}

/// Requires the body (after leading whitespace is stripped) to start with a shared
/// secret. The secret and any whitespace after it are stripped before allowing the
/// message through, so the bot never sees it.
pub struct SecretKeyRule {
    key: String,
}

impl SecretKeyRule {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Rule for SecretKeyRule {
    fn check(&self, message: &mut Message) -> Result<RuleResult, SecurityError> {
        let stripped = message.body.trim_start();
        match stripped.strip_prefix(self.key.as_str()) {
            Some(rest) => {
                message.body = rest.trim_start().to_string();
                Ok(RuleResult::allow())
            }
            None => Ok(RuleResult::block("secret key missing")),
        }
    }

    fn name(&self) -> &'static str {
        "secret-key"
    }
}

/// Allowlist or denylist on sender address / sender domain (`*@domain` entries match
/// a whole domain).
pub struct FilterSenderRule {
    mode: crate::config::FilterMode,
    addresses: std::collections::HashSet<String>,
    domains: std::collections::HashSet<String>,
}

impl FilterSenderRule {
    pub fn new(mode: crate::config::FilterMode, entries: &[String]) -> Self {
        let mut addresses = std::collections::HashSet::new();
        let mut domains = std::collections::HashSet::new();
        for entry in entries {
            let e = entry.trim().to_lowercase();
            match e.strip_prefix("*@") {
                Some(domain) => {
                    domains.insert(domain.to_string());
                }
                None => {
                    addresses.insert(e);
                }
            }
        }
        Self { mode, addresses, domains }
    }
}

impl Rule for FilterSenderRule {
    fn check(&self, message: &mut Message) -> Result<RuleResult, SecurityError> {
        let addr = message.from.address().to_lowercase();
        let domain = message.from.domain().to_lowercase();
        let matched = self.addresses.contains(&addr) || self.domains.contains(&domain);
        let blocked = match self.mode {
            crate::config::FilterMode::Allowlist => !matched,
            crate::config::FilterMode::Denylist => matched,
        };
        if blocked {
            Ok(RuleResult::block(format!("sender {} is not permitted", addr)))
        } else {
            Ok(RuleResult::allow())
        }
    }

    fn name(&self) -> &'static str {
        "filter-sender"
    }
}

/// Ordered chain of rules. Construct with `builder()` for full manual control, or
/// `from_config()` for the canonical construction order: secret-key, filter-sender,
/// rate-limit (global), rate-limit-per-domain, rate-limit-per-sender.
pub struct SecurityFilter {
    rules: Vec<Box<dyn Rule>>,
}

pub struct SecurityFilterBuilder {
    rules: Vec<Box<dyn Rule>>,
}

impl SecurityFilterBuilder {
    pub fn push(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn build(self) -> SecurityFilter {
        SecurityFilter { rules: self.rules }
    }
}

impl SecurityFilter {
    pub fn builder() -> SecurityFilterBuilder {
        SecurityFilterBuilder { rules: Vec::new() }
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut builder = Self::builder();
        if let Some(key) = &config.secret_key {
            builder = builder.push(SecretKeyRule::new(key.expose()));
        }
        if let Some(mode) = config.filter_mode {
            if !config.filter_addresses.is_empty() {
                builder = builder.push(FilterSenderRule::new(mode, &config.filter_addresses));
            }
        }
        if let Some(rl) = &config.rate_limit {
            builder = builder.push(RateLimitRule::new(rl.limit, Duration::from_secs(rl.window_secs)));
        }
        if let Some(rl) = &config.rate_limit_per_domain {
            builder = builder.push(RateLimitPerKeyRule::per_domain(rl.limit, Duration::from_secs(rl.window_secs)));
        }
        if let Some(rl) = &config.rate_limit_per_sender {
            builder = builder.push(RateLimitPerKeyRule::per_sender(rl.limit, Duration::from_secs(rl.window_secs)));
        }
        if builder.rules.is_empty() {
            builder = builder.push(AllowAllRule);
        }
        Ok(builder.build())
    }

    /// Run the chain; returns the result of the first rule to block, or an allow if
    /// every rule allows.
    pub fn check(&self, message: &mut Message) -> Result<RuleResult, SecurityError> {
        for rule in &self.rules {
            let result = rule.check(message)?;
            if result.action == Action::Block {
                info!(
                    target: "SECURITY",
                    rule = rule.name(),
                    reason = result.reason.as_deref().unwrap_or(""),
                    from = %message.from,
                    subject = %message.subject,
                    "blocked message"
                );
                return Ok(result);
            }
        }
        Ok(RuleResult::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterMode;

    fn msg(from: &str, body: &str) -> Message {
        let (local, domain) = from.split_once('@').unwrap();
        Message {
            from: crate::mime::EmailAddress::new(None::<String>, local, domain),
            to: Vec::new(),
            subject: "hi".to_string(),
            body: body.to_string(),
            sent_at: None,
            uid: None,
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            raw: Vec::new(),
        }
    }

    #[test]
    fn secret_key_strips_prefix_and_allows() {
        let rule = SecretKeyRule::new("sesame");
        let mut m = msg("a@b.com", "  sesame   do the thing");
        let result = rule.check(&mut m).unwrap();
        assert_eq!(result.action, Action::Allow);
        assert_eq!(m.body, "do the thing");
    }

    #[test]
    fn secret_key_blocks_without_prefix() {
        let rule = SecretKeyRule::new("sesame");
        let mut m = msg("a@b.com", "open up");
        let result = rule.check(&mut m).unwrap();
        assert_eq!(result.action, Action::Block);
    }

    #[test]
    fn filter_sender_allowlist_blocks_unknown_domain() {
        let rule = FilterSenderRule::new(FilterMode::Allowlist, &["*@trusted.com".to_string()]);
        let mut ok = msg("anyone@trusted.com", "hi");
        let mut bad = msg("anyone@evil.com", "hi");
        assert_eq!(rule.check(&mut ok).unwrap().action, Action::Allow);
        assert_eq!(rule.check(&mut bad).unwrap().action, Action::Block);
    }

    #[test]
    fn end_to_end_chain_blocks_on_first_failing_rule() {
        let filter = SecurityFilter::builder()
            .push(SecretKeyRule::new("sesame"))
            .push(FilterSenderRule::new(FilterMode::Denylist, &["spammer@evil.com".to_string()]))
            .build();
        let mut blocked_by_key = msg("spammer@evil.com", "no key here");
        let result = filter.check(&mut blocked_by_key).unwrap();
        assert_eq!(result.action, Action::Block);

        let mut passes = msg("friend@good.com", "sesame hello");
        let result = filter.check(&mut passes).unwrap();
        assert_eq!(result.action, Action::Allow);
        assert_eq!(passes.body, "hello");
    }

    #[test]
    fn from_config_rejects_filter_addresses_without_mode() {
        let config = SecurityConfig {
            secret_key: None,
            filter_mode: None,
            filter_addresses: vec!["spammer@evil.com".to_string()],
            rate_limit: None,
            rate_limit_per_sender: None,
            rate_limit_per_domain: None,
        };
        let err = SecurityFilter::from_config(&config).unwrap_err();
        assert!(matches!(err, crate::config::ConfigError::FilterModeMissing));
    }
}
