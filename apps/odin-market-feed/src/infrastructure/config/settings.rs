//! Feed Configuration Settings
//!
//! Configuration types for the feed client, loaded from environment variables.

use std::time::Duration;

use crate::application::ports::Endpoint;
use crate::domain::control::TouchlineOptions;
use crate::infrastructure::odin::compression::{Compression, DEFAULT_MAX_INFLATED_LEN};
use crate::infrastructure::odin::framing::GarbagePolicy;

/// Longest accepted host name.
pub const MAX_HOST_LEN: usize = 253;

/// Longest accepted user id.
pub const MAX_USER_ID_LEN: usize = 12;

/// Default scrips for the demo binary.
pub const DEFAULT_DEMO_SCRIPS: &str = "1_22,1_2885";

/// Feed account credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user_id: String,
    api_key: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(user_id: String, api_key: Option<String>) -> Self {
        Self { user_id, api_key }
    }

    /// Get the user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Per-session protocol settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Outbound compression.
    pub compression: Compression,
    /// What to do with bytes that are not a packet header.
    pub framing_policy: GarbagePolicy,
    /// Touchline response options.
    pub touchline: TouchlineOptions,
    /// Upper bound on an inflated packet body.
    pub max_inflated_len: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            compression: Compression::On,
            framing_policy: GarbagePolicy::Strict,
            touchline: TouchlineOptions::default(),
            max_inflated_len: DEFAULT_MAX_INFLATED_LEN,
        }
    }
}

/// Channel capacities between the session task and its users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Capacity of the event channel to the consumer.
    pub event_capacity: usize,
    /// Capacity of the command channel into the session.
    pub command_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            event_capacity: 4_096,
            command_capacity: 64,
        }
    }
}

/// Settings only the demo binary uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSettings {
    /// Scrips to subscribe for LTP touchline.
    pub scrips: Vec<String>,
    /// How long to stream before disconnecting.
    pub run_for: Duration,
    /// Prometheus listener port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            scrips: split_list(DEFAULT_DEMO_SCRIPS),
            run_for: Duration::from_secs(60),
            metrics_port: 0,
        }
    }
}

/// Complete feed client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Feed server endpoint.
    pub endpoint: Endpoint,
    /// Account credentials.
    pub credentials: Credentials,
    /// Protocol settings.
    pub session: SessionSettings,
    /// Channel capacities.
    pub channels: ChannelSettings,
    /// Demo binary settings.
    pub demo: DemoSettings,
}

impl FeedConfig {
    /// Build a validated configuration with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection parameter is out of range.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        use_tls: bool,
        credentials: Credentials,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            endpoint: Endpoint {
                host: host.into(),
                port,
                use_tls,
            },
            credentials,
            session: SessionSettings::default(),
            channels: ChannelSettings::default(),
            demo: DemoSettings::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or a
    /// connection parameter is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a key lookup.
    ///
    /// # Errors
    ///
    /// See [`FeedConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = required(&lookup, "ODIN_HOST")?;
        let user_id = required(&lookup, "ODIN_USER_ID")?;

        let port_raw = required(&lookup, "ODIN_PORT")?;
        let port = port_raw
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidValue {
                key: "ODIN_PORT".to_string(),
                value: port_raw.clone(),
            })?;

        let api_key = lookup("ODIN_API_KEY").filter(|k| !k.is_empty());
        let use_tls = parse_bool(&lookup, "ODIN_USE_TLS", false);

        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            compression: Compression::from_enabled(parse_bool(
                &lookup,
                "ODIN_COMPRESSION",
                session_defaults.compression.is_enabled(),
            )),
            framing_policy: lookup("ODIN_FRAMING_POLICY")
                .map(|s| GarbagePolicy::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            touchline: TouchlineOptions {
                native: parse_bool(&lookup, "ODIN_NATIVE_TOUCHLINE", false),
                ltp_change_only: parse_bool(&lookup, "ODIN_LTP_CHANGE_ONLY", false),
            },
            max_inflated_len: parse_usize(
                &lookup,
                "ODIN_MAX_INFLATED_BYTES",
                session_defaults.max_inflated_len,
            ),
        };

        let channel_defaults = ChannelSettings::default();
        let channels = ChannelSettings {
            event_capacity: parse_usize(
                &lookup,
                "ODIN_EVENT_CHANNEL_CAPACITY",
                channel_defaults.event_capacity,
            )
            .max(1),
            command_capacity: parse_usize(
                &lookup,
                "ODIN_COMMAND_CHANNEL_CAPACITY",
                channel_defaults.command_capacity,
            )
            .max(1),
        };

        let demo_defaults = DemoSettings::default();
        let demo = DemoSettings {
            scrips: lookup("ODIN_SCRIPS").map_or(demo_defaults.scrips, |s| split_list(&s)),
            run_for: lookup("ODIN_RUN_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(demo_defaults.run_for, Duration::from_secs),
            metrics_port: lookup("ODIN_METRICS_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(demo_defaults.metrics_port),
        };

        let config = Self {
            endpoint: Endpoint {
                host,
                port,
                use_tls,
            },
            credentials: Credentials::new(user_id, api_key),
            session,
            channels,
            demo,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check connection parameters.
    ///
    /// # Errors
    ///
    /// Returns the first parameter that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = self.endpoint.host.trim();
        if host.is_empty() {
            return Err(ConfigError::EmptyValue("host".to_string()));
        }
        if host.len() > MAX_HOST_LEN {
            return Err(ConfigError::HostTooLong(host.len()));
        }
        if self.endpoint.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "port".to_string(),
                value: "0".to_string(),
            });
        }

        let user_id = self.credentials.user_id().trim();
        if user_id.is_empty() {
            return Err(ConfigError::EmptyValue("user id".to_string()));
        }
        if user_id.len() > MAX_USER_ID_LEN {
            return Err(ConfigError::UserIdTooLong(user_id.len()));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Value is empty.
    #[error("{0} cannot be empty")]
    EmptyValue(String),
    /// Value could not be parsed or is out of range.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Host name is too long.
    #[error("host name is {0} characters, at most {MAX_HOST_LEN} allowed")]
    HostTooLong(usize),
    /// User id is too long.
    #[error("user id is {0} characters, at most {MAX_USER_ID_LEN} allowed")]
    UserIdTooLong(usize),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value.trim().to_string())
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_usize<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ODIN_HOST", "feed.example.com"),
            ("ODIN_PORT", "4509"),
            ("ODIN_USER_ID", "TRADER1"),
        ]
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let config = FeedConfig::from_lookup(lookup(&minimal())).unwrap();

        assert_eq!(config.endpoint.url(), "ws://feed.example.com:4509");
        assert_eq!(config.credentials.user_id(), "TRADER1");
        assert!(config.credentials.api_key().is_none());
        assert_eq!(config.session, SessionSettings::default());
        assert_eq!(config.channels, ChannelSettings::default());
        assert_eq!(config.demo.scrips, vec!["1_22", "1_2885"]);
    }

    #[test]
    fn full_env_is_applied() {
        let mut pairs = minimal();
        pairs.extend([
            ("ODIN_API_KEY", "k3y"),
            ("ODIN_USE_TLS", "true"),
            ("ODIN_COMPRESSION", "off"),
            ("ODIN_NATIVE_TOUCHLINE", "1"),
            ("ODIN_LTP_CHANGE_ONLY", "yes"),
            ("ODIN_FRAMING_POLICY", "resync"),
            ("ODIN_EVENT_CHANNEL_CAPACITY", "16"),
            ("ODIN_COMMAND_CHANNEL_CAPACITY", "0"),
            ("ODIN_SCRIPS", "2_100, 2_200,"),
            ("ODIN_RUN_SECS", "5"),
        ]);

        let config = FeedConfig::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.endpoint.url(), "wss://feed.example.com:4509");
        assert_eq!(config.credentials.api_key(), Some("k3y"));
        assert_eq!(config.session.compression, Compression::Off);
        assert_eq!(config.session.framing_policy, GarbagePolicy::Resync);
        assert!(config.session.touchline.native);
        assert!(config.session.touchline.ltp_change_only);
        assert_eq!(config.channels.event_capacity, 16);
        assert_eq!(config.channels.command_capacity, 1);
        assert_eq!(config.demo.scrips, vec!["2_100", "2_200"]);
        assert_eq!(config.demo.run_for, Duration::from_secs(5));
    }

    #[test_case("ODIN_HOST" ; "host")]
    #[test_case("ODIN_PORT" ; "port")]
    #[test_case("ODIN_USER_ID" ; "user id")]
    fn missing_required_var(key: &str) {
        let pairs: Vec<_> = minimal().into_iter().filter(|(k, _)| *k != key).collect();

        assert_eq!(
            FeedConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::MissingEnvVar(key.to_string()))
        );
    }

    #[test_case("0" ; "zero")]
    #[test_case("65536" ; "too large")]
    #[test_case("http" ; "not a number")]
    fn invalid_port(port: &str) {
        let mut pairs = minimal();
        pairs.retain(|(k, _)| *k != "ODIN_PORT");
        pairs.push(("ODIN_PORT", port));

        assert!(matches!(
            FeedConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn user_id_length_is_bounded() {
        let creds = Credentials::new("ABCDEFGHIJKLM".to_string(), None);

        assert_eq!(
            FeedConfig::new("localhost", 4509, false, creds),
            Err(ConfigError::UserIdTooLong(13))
        );
    }

    #[test]
    fn host_length_is_bounded() {
        let creds = Credentials::new("TRADER1".to_string(), None);

        assert_eq!(
            FeedConfig::new("h".repeat(254), 4509, false, creds),
            Err(ConfigError::HostTooLong(254))
        );
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("TRADER1".to_string(), Some("secret456".to_string()));
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }
}
