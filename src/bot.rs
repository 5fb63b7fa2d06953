//! Bot identity: resolves which configured bot, if any, a fetched message addresses.

use regex::Regex;

use crate::config::{BotSpec, ConfigError};
use crate::mime::EmailAddress;

enum BotMatcher {
    Exact(String),
    Regex(Regex),
}

pub struct Bot {
    pub spec: BotSpec,
    matcher: BotMatcher,
}

impl Bot {
    pub fn new(spec: BotSpec) -> Result<Self, ConfigError> {
        spec.validate()?;
        let matcher = if let Some(addr) = &spec.address {
            BotMatcher::Exact(addr.to_lowercase())
        } else {
            let pattern = spec
                .address_regex
                .as_ref()
                .expect("validate() guarantees address_regex is set when address is not");
            let re = Regex::new(pattern)
                .map_err(|e| ConfigError::InvalidBotRegex(spec.name.clone(), e))?;
            BotMatcher::Regex(re)
        };
        Ok(Self { spec, matcher })
    }

    pub fn matches(&self, address: &EmailAddress) -> bool {
        let full = address.address().to_lowercase();
        match &self.matcher {
            BotMatcher::Exact(a) => a == &full,
            BotMatcher::Regex(re) => re.is_match(&full),
        }
    }

    /// The bot's own address to send replies from, when it was configured with a literal
    /// address. Regex-matched bots have no single reply-from address, so such a bot
    /// cannot originate replies.
    pub fn address_for_reply(&self) -> Option<EmailAddress> {
        let addr = self.spec.address.as_ref()?;
        let (local, domain) = addr.split_once('@')?;
        Some(EmailAddress::new(None::<String>, local, domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(address: Option<&str>, regex: Option<&str>) -> BotSpec {
        BotSpec {
            name: "helper".to_string(),
            address: address.map(|s| s.to_string()),
            address_regex: regex.map(|s| s.to_string()),
            max_input_length: 5000,
            system_prompt: "be helpful".to_string(),
            chat_model_params: serde_json::Value::Null,
            retries: 3,
        }
    }

    #[test]
    fn exact_address_matches_case_insensitively() {
        let bot = Bot::new(spec(Some("Helper@Example.com"), None)).unwrap();
        let addr = EmailAddress::new(None::<String>, "helper", "example.com");
        assert!(bot.matches(&addr));
    }

    #[test]
    fn regex_bot_matches_pattern() {
        let bot = Bot::new(spec(None, Some(r"^support\+.*@example\.com$"))).unwrap();
        let addr = EmailAddress::new(None::<String>, "support+billing", "example.com");
        assert!(bot.matches(&addr));
        assert!(bot.address_for_reply().is_none());
    }

    #[test]
    fn rejects_both_address_and_regex() {
        let err = Bot::new(spec(Some("a@b.com"), Some("^x$"))).unwrap_err();
        assert!(matches!(err, ConfigError::BotAddressAmbiguous(_)));
    }

    #[test]
    fn rejects_neither_address_nor_regex() {
        let err = Bot::new(spec(None, None)).unwrap_err();
        assert!(matches!(err, ConfigError::BotAddressAmbiguous(_)));
    }
}
