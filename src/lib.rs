//! feedping - reliable MQTT feed publisher
//!
//! Publishes a single value to an Adafruit IO feed over MQTT (3.1.1 or v5) and TLS,
//! waits for the broker to confirm it according to the QoS level, and
//! retries transient failures within bounded attempts and time.
//!
//! # Overview
//!
//! - [`publisher`] - Connection lifecycle, delivery confirmation and retry
//! - [`transport`] - The transport seam and its rumqttc implementation
//! - [`config`] - TOML configuration with credentials taken from the environment
//! - [`error`] - Error taxonomy mapped onto outcome statuses and exit codes
//! - [`observability`] - Structured logging
//! - [`testing`] - Scripted transports for tests
//!
//! # Quick Start
//!
//! ```rust
//! use feedping::publisher::{PublishRequest, PublishStatus, Publisher, QosLevel, RetryPolicy};
//! use feedping::testing::MockTransport;
//! use feedping::transport::BrokerTarget;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let publisher = Publisher::new(
//!     MockTransport::new(),
//!     BrokerTarget::new("localhost", 1883),
//!     RetryPolicy::default(),
//!     Duration::from_secs(2),
//! );
//!
//! let request = PublishRequest::new("acct/feeds/beeper", "true", QosLevel::AtLeastOnce)?;
//! let outcome = publisher.publish(&request).await;
//! assert_eq!(outcome.status, PublishStatus::Success);
//! assert_eq!(outcome.attempts, 1);
//! # Ok::<(), feedping::error::PublishError>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod publisher;
pub mod testing;
pub mod transport;

pub use config::*;
pub use error::PublishError;
pub use publisher::{
    CancelToken, PublishOutcome, PublishRequest, PublishStatus, Publisher, QosLevel, RetryPolicy,
};
pub use transport::mqtt::MqttTransport;
