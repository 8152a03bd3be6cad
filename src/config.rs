//! Configuration system for feedping
//!
//! Configuration is read from a TOML file whose sections all have defaults, so
//! an empty file (or no file at all) describes a publish of `"true"` to the
//! `beeper` feed on Adafruit IO. Secrets are never stored in the file: the
//! `[auth]` section names the environment variables that hold them and they
//! are resolved at runtime.

use crate::transport::mqtt::MIN_KEEP_ALIVE;
use crate::transport::{BrokerTarget, ProtocolVersion, TlsMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default Adafruit IO broker over TLS
pub const DEFAULT_BROKER_URL: &str = "mqtts://io.adafruit.com:8883";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedpingConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    /// Broker URL, `mqtts://` for TLS or `mqtt://` for plain TCP
    pub broker_url: String,
    /// MQTT revision, `v311` (Adafruit IO) or `v5`
    pub protocol: ProtocolVersion,
    /// Extra PEM CA bundle trusted instead of the system roots
    pub ca_file: Option<PathBuf>,
    /// Client id prefix; a unique suffix is appended per connection
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    /// Deadline for TCP + TLS + CONNACK
    pub connect_timeout_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            protocol: ProtocolVersion::default(),
            ca_file: None,
            client_id_prefix: "feedping".to_string(),
            keep_alive_secs: 30,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Names of the environment variables that hold the credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSection {
    pub username_env: String,
    pub key_env: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            username_env: "ADAFRUIT_IO_USERNAME".to_string(),
            key_env: "ADAFRUIT_IO_KEY".to_string(),
        }
    }
}

/// Feed addressing: `<account>/feeds/<key>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedSection {
    /// Account owning the feed (defaults to the username)
    pub account: Option<String>,
    pub key: String,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            account: None,
            key: "beeper".to_string(),
        }
    }
}

/// What to publish and how long to wait for the acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishSection {
    pub payload: String,
    /// MQTT QoS level (0, 1 or 2)
    pub qos: u8,
    pub retain: bool,
    /// Per-attempt acknowledgement deadline
    pub timeout_ms: u64,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            payload: "true".to_string(),
            qos: 1,
            retain: false,
            timeout_ms: 5_000,
        }
    }
}

/// Retry bounds and backoff shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Total time budget measured from the first attempt
    pub max_elapsed_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fraction of each delay that is randomised (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_elapsed_ms: 30_000,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Username and key presented in CONNECT
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub key: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            key: key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("key", &"***")
            .finish()
    }
}

impl FeedpingConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FeedpingConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges and the broker URL without touching the environment
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker.broker_url)?;

        if self.publish.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "publish.qos must be 0, 1 or 2, got {}",
                self.publish.qos
            )));
        }
        if self.publish.timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.timeout_ms must be greater than 0".to_string(),
            ));
        }
        validate_topic_segment("feed.key", &self.feed.key)?;
        if let Some(account) = &self.feed.account {
            validate_topic_segment("feed.account", account)?;
        }
        if self.broker.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.broker.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.client_id_prefix must not be empty".to_string(),
            ));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.max_elapsed_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_elapsed_ms must be greater than 0".to_string(),
            ));
        }
        if retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "retry.multiplier must be >= 1.0, got {}",
                retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::InvalidConfig(format!(
                "retry.jitter must be within 0.0..=1.0, got {}",
                retry.jitter
            )));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::InvalidConfig(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Resolve credentials from the configured environment variables
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let username = Self::get_env_var_required(&self.auth.username_env)?;
        let key = Self::get_env_var_required(&self.auth.key_env)?;
        Ok(Credentials::new(username, key))
    }

    /// Feed topic for the given credentials
    pub fn feed_topic(&self, credentials: &Credentials) -> Result<String, ConfigError> {
        let account = self
            .feed
            .account
            .as_deref()
            .unwrap_or(credentials.username.as_str());
        validate_topic_segment("account", account)?;
        Ok(TopicBuilder::feed_topic(account, &self.feed.key))
    }

    /// Build the broker target handed to the connection manager
    pub fn broker_target(&self, credentials: Credentials) -> Result<BrokerTarget, ConfigError> {
        let endpoint = parse_broker_url(&self.broker.broker_url)?;
        let tls = match (endpoint.tls, &self.broker.ca_file) {
            (false, _) => TlsMode::Disabled,
            (true, None) => TlsMode::SystemRoots,
            (true, Some(path)) => TlsMode::CustomCa(std::fs::read(path)?),
        };

        Ok(BrokerTarget {
            host: endpoint.host,
            port: endpoint.port,
            tls,
            protocol: self.broker.protocol,
            credentials: Some(credentials),
            client_id_prefix: self.broker.client_id_prefix.clone(),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs).max(MIN_KEEP_ALIVE),
            connect_timeout: Duration::from_millis(self.broker.connect_timeout_ms),
        })
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish.timeout_ms)
    }
}

/// Host, port and TLS flag extracted from a broker URL
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]`
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerEndpoint, ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtts" | "ssl" => true,
        "mqtt" | "tcp" => false,
        _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
    };
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

fn validate_topic_segment(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidConfig(format!("{field} must not be empty")));
    }
    if value.contains(['/', '+', '#']) {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} '{value}' must not contain '/', '+' or '#'"
        )));
    }
    Ok(())
}

/// Adafruit IO topic construction
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build feed topic: `{account}/feeds/{feed_key}`
    pub fn feed_topic(account: &str, feed_key: &str) -> String {
        format!("{account}/feeds/{feed_key}")
    }
}
