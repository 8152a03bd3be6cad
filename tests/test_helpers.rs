//! Test helpers and utilities for integration tests

use feedping::config::Credentials;
use feedping::publisher::{PublishRequest, QosLevel, RetryPolicy};
use feedping::transport::BrokerTarget;
use std::time::Duration;

/// Feed topic used by the publish scenarios
#[allow(dead_code)]
pub const FEED_TOPIC: &str = "acct/feeds/beeper";

/// Target with test credentials pointing at a non-existent plain broker
#[allow(dead_code)]
pub fn test_target() -> BrokerTarget {
    BrokerTarget::new("stub.local", 1883).with_credentials(Credentials::new("acct", "aio_testkey"))
}

/// The trigger publish: payload `true` at QoS 1
#[allow(dead_code)]
pub fn trigger_request() -> PublishRequest {
    PublishRequest::new(FEED_TOPIC, "true", QosLevel::AtLeastOnce).unwrap()
}

/// Three attempts, no jitter, generous elapsed budget
#[allow(dead_code)]
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        max_elapsed: Duration::from_secs(60),
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        multiplier: 2.0,
        jitter: 0.0,
    }
}
