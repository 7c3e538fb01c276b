use std::env;
use std::time::Duration;

use nostr::{Keypair, parse_public_key};
use thiserror::Error;

pub const DEFAULT_RELAY_URL: &str = "wss://relay.nostr.net";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid NOSTR_RELAY: {0}")]
    InvalidRelayUrl(String),
    #[error("invalid DVM_PRIVATE_KEY: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid DVM_PUBKEY: {0}")]
    InvalidPublicKey(String),
    #[error("DVM_PUBKEY is not set; pass the responder's public key")]
    MissingPublicKey,
    #[error("invalid DVM_REQUEST_TIMEOUT_SECS: {0}")]
    InvalidRequestTimeout(String),
    #[error("invalid DVM_KEEPALIVE_SECS: {0}")]
    InvalidKeepalive(String),
}

/// Responder settings.
#[derive(Clone, Debug)]
pub struct DvmConfig {
    pub relay_url: String,
    pub keys: Keypair,
    /// Set when no `DVM_PRIVATE_KEY` was supplied and `keys` was generated for this process.
    pub ephemeral_key: bool,
    pub keepalive_interval: Duration,
}

impl DvmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay_url = parse_relay_url(lookup("NOSTR_RELAY"))?;
        let (keys, ephemeral_key) = match non_empty(lookup("DVM_PRIVATE_KEY")) {
            Some(secret) => (parse_private_key(&secret)?, false),
            None => (Keypair::generate(), true),
        };
        let keepalive_secs = parse_seconds(
            lookup("DVM_KEEPALIVE_SECS"),
            DEFAULT_KEEPALIVE_SECS,
            ConfigError::InvalidKeepalive,
        )?;

        Ok(Self {
            relay_url,
            keys,
            ephemeral_key,
            keepalive_interval: Duration::from_secs(keepalive_secs),
        })
    }

    pub fn with_relay_url(mut self, relay_url: &str) -> Result<Self, ConfigError> {
        self.relay_url = parse_relay_url(Some(relay_url.to_string()))?;
        Ok(self)
    }

    pub fn with_keepalive_secs(mut self, seconds: u64) -> Result<Self, ConfigError> {
        if seconds == 0 {
            return Err(ConfigError::InvalidKeepalive(
                "must be greater than zero".to_string(),
            ));
        }
        self.keepalive_interval = Duration::from_secs(seconds);
        Ok(self)
    }
}

/// Requester settings. The requester always signs with a fresh key.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub relay_url: String,
    pub keys: Keypair,
    /// Responder public key as lowercase hex.
    pub responder_pubkey: Option<String>,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay_url = parse_relay_url(lookup("NOSTR_RELAY"))?;
        let responder_pubkey = non_empty(lookup("DVM_PUBKEY"))
            .map(|value| parse_responder(&value))
            .transpose()?;
        let timeout_secs = parse_seconds(
            lookup("DVM_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
            ConfigError::InvalidRequestTimeout,
        )?;

        Ok(Self {
            relay_url,
            keys: Keypair::generate(),
            responder_pubkey,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn with_relay_url(mut self, relay_url: &str) -> Result<Self, ConfigError> {
        self.relay_url = parse_relay_url(Some(relay_url.to_string()))?;
        Ok(self)
    }

    pub fn with_responder(mut self, responder: &str) -> Result<Self, ConfigError> {
        self.responder_pubkey = Some(parse_responder(responder)?);
        Ok(self)
    }

    pub fn with_request_timeout_secs(mut self, seconds: u64) -> Result<Self, ConfigError> {
        if seconds == 0 {
            return Err(ConfigError::InvalidRequestTimeout(
                "must be greater than zero".to_string(),
            ));
        }
        self.request_timeout = Duration::from_secs(seconds);
        Ok(self)
    }

    /// The configured responder, or an error naming the missing setting.
    pub fn responder(&self) -> Result<&str, ConfigError> {
        self.responder_pubkey
            .as_deref()
            .ok_or(ConfigError::MissingPublicKey)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_relay_url(value: Option<String>) -> Result<String, ConfigError> {
    let Some(relay_url) = non_empty(value) else {
        return Ok(DEFAULT_RELAY_URL.to_string());
    };
    nostr_client::parse_relay_url(&relay_url)
        .map_err(|error| ConfigError::InvalidRelayUrl(format!("{relay_url}: {error}")))?;
    Ok(relay_url)
}

fn parse_private_key(value: &str) -> Result<Keypair, ConfigError> {
    Keypair::parse(value).map_err(|error| ConfigError::InvalidPrivateKey(error.to_string()))
}

fn parse_responder(value: &str) -> Result<String, ConfigError> {
    parse_public_key(value).map_err(|error| ConfigError::InvalidPublicKey(error.to_string()))
}

fn parse_seconds(
    value: Option<String>,
    default: u64,
    invalid: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    let Some(raw) = non_empty(value) else {
        return Ok(default);
    };
    let seconds = raw
        .parse::<u64>()
        .map_err(|error| invalid(format!("{raw}: {error}")))?;
    if seconds == 0 {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const PRIVATE_KEY_HEX: &str =
        "7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a";
    const PUBLIC_KEY_HEX: &str = "17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917";
    const NPUB: &str = "npub1zutzeysacnf9rru6zqwmxd54mud0k44tst6l70ja5mhv8jjumytsd2x7nu";

    fn lookup<'a>(values: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| values.get(key).map(ToString::to_string)
    }

    #[test]
    fn responder_defaults() -> Result<(), ConfigError> {
        let values = HashMap::new();
        let config = DvmConfig::from_lookup(lookup(&values))?;
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert!(config.ephemeral_key);
        assert_eq!(
            config.keepalive_interval,
            Duration::from_secs(DEFAULT_KEEPALIVE_SECS)
        );
        Ok(())
    }

    #[test]
    fn responder_applies_env_overrides() -> Result<(), ConfigError> {
        let values = HashMap::from([
            ("NOSTR_RELAY", "wss://relay.example.com"),
            ("DVM_PRIVATE_KEY", PRIVATE_KEY_HEX),
            ("DVM_KEEPALIVE_SECS", "5"),
        ]);
        let config = DvmConfig::from_lookup(lookup(&values))?;
        assert_eq!(config.relay_url, "wss://relay.example.com");
        assert!(!config.ephemeral_key);
        assert_eq!(config.keys.public_key_hex(), PUBLIC_KEY_HEX);
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));

        let overridden = config.with_relay_url("ws://localhost:7000")?;
        assert_eq!(overridden.relay_url, "ws://localhost:7000");
        Ok(())
    }

    #[test]
    fn responder_rejects_invalid_values() {
        let cases = [
            ("NOSTR_RELAY", "https://relay.example.com"),
            ("NOSTR_RELAY", "wss://"),
            ("NOSTR_RELAY", "wss://exa mple.com"),
            ("NOSTR_RELAY", "ws://[::1"),
            ("DVM_PRIVATE_KEY", "not-a-key"),
            ("DVM_KEEPALIVE_SECS", "soon"),
            ("DVM_KEEPALIVE_SECS", "0"),
        ];
        for (key, value) in cases {
            let values = HashMap::from([(key, value)]);
            assert!(
                DvmConfig::from_lookup(lookup(&values)).is_err(),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn malformed_relay_override_is_a_config_error() -> Result<(), ConfigError> {
        let config = ClientConfig::from_lookup(lookup(&HashMap::new()))?;
        assert!(matches!(
            config.with_relay_url("wss://exa mple.com"),
            Err(ConfigError::InvalidRelayUrl(_))
        ));

        let config = DvmConfig::from_lookup(lookup(&HashMap::new()))?
            .with_relay_url("ws://127.0.0.1:7000")?;
        assert_eq!(config.relay_url, "ws://127.0.0.1:7000");
        Ok(())
    }

    #[test]
    fn client_reads_responder_as_hex_or_npub() -> Result<(), ConfigError> {
        let values = HashMap::from([("DVM_PUBKEY", NPUB), ("DVM_REQUEST_TIMEOUT_SECS", "12")]);
        let config = ClientConfig::from_lookup(lookup(&values))?;
        assert_eq!(config.responder()?, PUBLIC_KEY_HEX);
        assert_eq!(config.request_timeout, Duration::from_secs(12));

        let config = config.with_responder(PUBLIC_KEY_HEX)?;
        assert_eq!(config.responder()?, PUBLIC_KEY_HEX);
        Ok(())
    }

    #[test]
    fn client_without_responder_reports_missing_key() -> Result<(), ConfigError> {
        let values = HashMap::from([("DVM_PUBKEY", "  ")]);
        let config = ClientConfig::from_lookup(lookup(&values))?;
        assert!(matches!(
            config.responder(),
            Err(ConfigError::MissingPublicKey)
        ));
        assert_eq!(
            config.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        Ok(())
    }
}
