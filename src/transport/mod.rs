//! Transport layer for reaching the broker
//!
//! The publisher talks to the broker through two traits: a [`Transport`]
//! opens an authenticated [`Link`], and the link carries one PUBLISH at a
//! time and reports what the broker did with it as [`LinkEvent`]s. The
//! rumqttc-backed implementation lives in [`mqtt`]; scripted in-process
//! implementations live in `crate::testing`.

use crate::config::Credentials;
use crate::publisher::QosLevel;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod mqtt;

/// How the TCP stream is secured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain TCP (`mqtt://`)
    Disabled,
    /// TLS validated against the system trust store
    SystemRoots,
    /// TLS validated against the given PEM CA bundle
    CustomCa(Vec<u8>),
}

/// MQTT protocol revision spoken on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// MQTT 3.1.1, what Adafruit IO and most device libraries speak
    #[default]
    V311,
    /// MQTT 5.0, with reason codes on acknowledgements
    V5,
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "v311" | "3.1.1" | "4" => Ok(ProtocolVersion::V311),
            "v5" | "5" | "5.0" => Ok(ProtocolVersion::V5),
            other => Err(format!("unknown MQTT protocol '{other}', expected v311 or v5")),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V311 => write!(f, "v311"),
            ProtocolVersion::V5 => write!(f, "v5"),
        }
    }
}

/// Everything needed to open a session with one broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerTarget {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub protocol: ProtocolVersion,
    pub credentials: Option<Credentials>,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    /// Deadline for TCP connect, TLS handshake and CONNACK together
    pub connect_timeout: Duration,
}

impl BrokerTarget {
    /// Plain-TCP target with default timings, mostly useful for local brokers
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: TlsMode::Disabled,
            protocol: ProtocolVersion::default(),
            credentials: None,
            client_id_prefix: "feedping".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Username presented to the broker, empty when anonymous
    pub fn username(&self) -> &str {
        self.credentials
            .as_ref()
            .map(|c| c.username.as_str())
            .unwrap_or("")
    }

    /// Unique client id per connection so a reconnect never collides with a
    /// session the broker still holds for the previous one
    pub fn generate_client_id(&self) -> String {
        format!("{}-{}", self.client_id_prefix, Uuid::new_v4().simple())
    }
}

/// Failures reported by a transport, before publisher context is attached
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("credentials refused: {0}")]
    Auth(String),
    #[error("connection refused by broker: {0}")]
    Refused(String),
    #[error("connection closed: {0}")]
    Closed(String),
}

/// Acknowledgement packets a publisher can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    PubAck,
    PubRec,
    PubComp,
}

/// Events a link reports while a publish is in flight
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The PUBLISH was flushed to the wire
    Written,
    /// The broker acknowledged with a success reason code
    Acknowledged(AckKind),
    /// The broker refused the publish (failure reason code or DISCONNECT)
    Rejected(String),
    /// The transport closed underneath the publish
    Closed(String),
}

/// Opens authenticated links to a broker
#[async_trait]
pub trait Transport: Send + Sync {
    type Link: Link;

    /// Connect, secure and authenticate; resolves once the broker accepted
    /// the session
    async fn open(&self, target: &BrokerTarget) -> Result<Self::Link, TransportError>;
}

/// One established broker session
#[async_trait]
pub trait Link: Send {
    /// Hand one PUBLISH to the transport
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Next event for the in-flight publish; `None` once the link is gone
    async fn next_event(&mut self) -> Option<LinkEvent>;

    /// Release the socket; calling it again is a no-op
    async fn close(&mut self);
}
