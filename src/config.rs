//! Validated configuration types. Deserializable only; loading/merging config files
//! from disk or the environment is outside this crate's scope.

use serde::Deserialize;

/// A string that must never be printed: passwords, secret keys, Redis credentials.
#[derive(Clone, Deserialize)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(\"***\")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    None,
    StartTls,
    Tls,
}

impl EncryptionMode {
    /// The conventional default for a given IMAP port, if the port implies one unambiguously.
    pub fn default_for_imap_port(port: u16) -> Option<Self> {
        match port {
            143 => Some(EncryptionMode::StartTls),
            993 => Some(EncryptionMode::Tls),
            _ => None,
        }
    }

    /// The conventional default for a given SMTP port, if the port implies one unambiguously.
    pub fn default_for_smtp_port(port: u16) -> Option<Self> {
        match port {
            25 => Some(EncryptionMode::None),
            587 => Some(EncryptionMode::StartTls),
            465 => Some(EncryptionMode::Tls),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFetch {
    MarkRead,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Allowlist,
    Denylist,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    #[serde(default)]
    pub encryption: Option<EncryptionMode>,
    pub on_fetch: OnFetch,
    pub fetch_interval_secs: u64,
    pub fetch_max: u32,
    pub fetch_max_age_days: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl ImapConfig {
    /// A non-standard port with no explicit `encryption` is a configuration error: there
    /// is no safe default to fall back on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encryption.is_none() && EncryptionMode::default_for_imap_port(self.port).is_none() {
            return Err(ConfigError::EncryptionModeRequired("imap", self.port));
        }
        Ok(())
    }

    pub fn resolved_encryption(&self) -> EncryptionMode {
        self.encryption.unwrap_or_else(|| {
            EncryptionMode::default_for_imap_port(self.port)
                .expect("validate() rejects a non-standard port with no explicit encryption")
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    #[serde(default)]
    pub encryption: Option<EncryptionMode>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl SmtpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encryption.is_none() && EncryptionMode::default_for_smtp_port(self.port).is_none() {
            return Err(ConfigError::EncryptionModeRequired("smtp", self.port));
        }
        Ok(())
    }

    pub fn resolved_encryption(&self) -> EncryptionMode {
        self.encryption.unwrap_or_else(|| {
            EncryptionMode::default_for_smtp_port(self.port)
                .expect("validate() rejects a non-standard port with no explicit encryption")
        })
    }
}

fn default_connect_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub secret_key: Option<SecretString>,
    #[serde(default)]
    pub filter_mode: Option<FilterMode>,
    #[serde(default)]
    pub filter_addresses: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub rate_limit_per_sender: Option<RateLimitConfig>,
    #[serde(default)]
    pub rate_limit_per_domain: Option<RateLimitConfig>,
}

impl SecurityConfig {
    /// `filter_addresses` with no `filter_mode` is contradictory: there is no way to
    /// tell whether the listed addresses are an allowlist or a denylist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter_mode.is_none() && !self.filter_addresses.is_empty() {
            return Err(ConfigError::FilterModeMissing);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bot `{0}` must set exactly one of address or address_regex")]
    BotAddressAmbiguous(String),
    #[error("bot `{0}` has an invalid address_regex: {1}")]
    InvalidBotRegex(String, regex::Error),
    #[error("filter_addresses is set but filter_mode is not")]
    FilterModeMissing,
    #[error("{0} port {1} is non-standard; set `encryption` explicitly")]
    EncryptionModeRequired(&'static str, u16),
}

fn default_max_input_length() -> usize {
    5000
}

fn default_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotSpec {
    pub name: String,
    pub address: Option<String>,
    pub address_regex: Option<String>,
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
    pub system_prompt: String,
    #[serde(default)]
    pub chat_model_params: serde_json::Value,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl BotSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.address, &self.address_regex) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ConfigError::BotAddressAmbiguous(self.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imap_config(port: u16, encryption: Option<EncryptionMode>) -> ImapConfig {
        ImapConfig {
            host: "mail.example.com".to_string(),
            port,
            username: "bot".to_string(),
            password: SecretString::new("hunter2"),
            encryption,
            on_fetch: OnFetch::MarkRead,
            fetch_interval_secs: 60,
            fetch_max: 10,
            fetch_max_age_days: 30,
            connect_timeout_secs: 30,
        }
    }

    #[test]
    fn imap_standard_port_defaults_without_explicit_encryption() {
        let config = imap_config(993, None);
        config.validate().unwrap();
        assert_eq!(config.resolved_encryption(), EncryptionMode::Tls);
    }

    #[test]
    fn imap_non_standard_port_requires_explicit_encryption() {
        let config = imap_config(2993, None);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::EncryptionModeRequired("imap", 2993)));
    }

    #[test]
    fn imap_non_standard_port_is_fine_with_explicit_encryption() {
        let config = imap_config(2993, Some(EncryptionMode::Tls));
        config.validate().unwrap();
        assert_eq!(config.resolved_encryption(), EncryptionMode::Tls);
    }

    fn smtp_config(port: u16, encryption: Option<EncryptionMode>) -> SmtpConfig {
        SmtpConfig {
            host: "mail.example.com".to_string(),
            port,
            username: "bot".to_string(),
            password: SecretString::new("hunter2"),
            encryption,
            connect_timeout_secs: 30,
        }
    }

    #[test]
    fn smtp_standard_port_defaults_without_explicit_encryption() {
        let config = smtp_config(587, None);
        config.validate().unwrap();
        assert_eq!(config.resolved_encryption(), EncryptionMode::StartTls);
    }

    #[test]
    fn smtp_non_standard_port_requires_explicit_encryption() {
        let config = smtp_config(2525, None);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::EncryptionModeRequired("smtp", 2525)));
    }

    #[test]
    fn security_config_rejects_filter_addresses_without_mode() {
        let config = SecurityConfig {
            secret_key: None,
            filter_mode: None,
            filter_addresses: vec!["spammer@evil.com".to_string()],
            rate_limit: None,
            rate_limit_per_sender: None,
            rate_limit_per_domain: None,
        };
        assert!(matches!(config.validate().unwrap_err(), ConfigError::FilterModeMissing));
    }

    #[test]
    fn security_config_allows_filter_addresses_with_mode() {
        let config = SecurityConfig {
            secret_key: None,
            filter_mode: Some(FilterMode::Denylist),
            filter_addresses: vec!["spammer@evil.com".to_string()],
            rate_limit: None,
            rate_limit_per_sender: None,
            rate_limit_per_domain: None,
        };
        config.validate().unwrap();
    }
}
