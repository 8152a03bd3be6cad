//! Publish requests and their outcomes

use crate::error::PublishError;
use crate::transport::AckKind;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// MQTT delivery guarantee for one publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    /// QoS 0: fire and forget, confirmed once written
    AtMostOnce,
    /// QoS 1: confirmed by PUBACK
    AtLeastOnce,
    /// QoS 2: confirmed by PUBCOMP
    ExactlyOnce,
}

impl QosLevel {
    /// Acknowledgement that completes a publish at this level
    ///
    /// `None` for QoS 0, which is complete as soon as the transport flushed
    /// the write.
    pub fn completion(self) -> Option<AckKind> {
        match self {
            QosLevel::AtMostOnce => None,
            QosLevel::AtLeastOnce => Some(AckKind::PubAck),
            QosLevel::ExactlyOnce => Some(AckKind::PubComp),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = PublishError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(PublishError::invalid_request(format!(
                "QoS must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

/// One immutable publish: topic, payload and delivery settings
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    topic: String,
    payload: Bytes,
    qos: QosLevel,
    retain: bool,
    issued_at: DateTime<Utc>,
}

impl PublishRequest {
    /// Build a request, rejecting empty topics and topics with wildcards
    pub fn new<T: Into<String>, P: Into<Bytes>>(
        topic: T,
        payload: P,
        qos: QosLevel,
    ) -> Result<Self, PublishError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(PublishError::invalid_request("topic must not be empty"));
        }
        if topic.contains(['+', '#']) {
            return Err(PublishError::invalid_request(format!(
                "topic '{topic}' must not contain wildcards"
            )));
        }

        Ok(Self {
            topic,
            payload: payload.into(),
            qos,
            retain: false,
            issued_at: Utc::now(),
        })
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn qos(&self) -> QosLevel {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// Final status of a logical publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Success,
    TimedOut,
    BrokerRejected,
    ConnectionLost,
    NetworkError,
    TlsError,
    AuthError,
    Cancelled,
}

impl PublishStatus {
    pub fn is_success(self) -> bool {
        self == PublishStatus::Success
    }

    /// Failures a later attempt could fix
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            PublishStatus::NetworkError | PublishStatus::ConnectionLost | PublishStatus::TimedOut
        )
    }

    /// Process exit code reported by the CLI
    pub fn exit_code(self) -> i32 {
        match self {
            PublishStatus::Success => 0,
            PublishStatus::AuthError => 3,
            PublishStatus::TlsError => 4,
            PublishStatus::NetworkError | PublishStatus::ConnectionLost => 5,
            PublishStatus::TimedOut => 6,
            PublishStatus::BrokerRejected => 7,
            PublishStatus::Cancelled => 130,
        }
    }
}

/// Result of a logical publish across all of its attempts
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub status: PublishStatus,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Last error seen, `None` on success
    pub error: Option<PublishError>,
}

impl PublishOutcome {
    pub fn success(attempts: u32, elapsed: Duration) -> Self {
        Self {
            status: PublishStatus::Success,
            attempts,
            elapsed,
            error: None,
        }
    }

    pub fn failure(error: PublishError, attempts: u32, elapsed: Duration) -> Self {
        Self {
            status: error.status(),
            attempts,
            elapsed,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn report(&self, topic: &str) -> OutcomeReport {
        OutcomeReport {
            status: self.status,
            topic: topic.to_string(),
            attempts: self.attempts,
            elapsed_ms: self.elapsed.as_millis() as u64,
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Serializable summary printed by `--json`
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub status: PublishStatus,
    pub topic: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validates_topic() {
        assert!(PublishRequest::new("acct/feeds/beeper", "true", QosLevel::AtLeastOnce).is_ok());

        let empty = PublishRequest::new("", "true", QosLevel::AtLeastOnce);
        assert!(matches!(empty, Err(PublishError::InvalidRequest { .. })));

        let wildcard = PublishRequest::new("acct/feeds/#", "true", QosLevel::AtLeastOnce);
        assert!(matches!(wildcard, Err(PublishError::InvalidRequest { .. })));

        let single = PublishRequest::new("acct/+/beeper", "true", QosLevel::AtLeastOnce);
        assert!(single.is_err());
    }

    #[test]
    fn test_request_keeps_payload_bytes() {
        let payload = vec![0u8, 0xff, b't', 0x80];
        let request =
            PublishRequest::new("acct/feeds/raw", payload.clone(), QosLevel::ExactlyOnce)
                .unwrap()
                .with_retain(true);

        assert_eq!(request.payload().as_ref(), payload.as_slice());
        assert!(request.retain());
        assert_eq!(request.qos(), QosLevel::ExactlyOnce);
        assert!(request.issued_at() <= Utc::now());
    }

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(QosLevel::try_from(0).unwrap(), QosLevel::AtMostOnce);
        assert_eq!(QosLevel::try_from(1).unwrap(), QosLevel::AtLeastOnce);
        assert_eq!(QosLevel::try_from(2).unwrap(), QosLevel::ExactlyOnce);
        assert!(QosLevel::try_from(3).is_err());
        assert_eq!(QosLevel::ExactlyOnce.as_u8(), 2);
    }

    #[test]
    fn test_qos_completion() {
        assert_eq!(QosLevel::AtMostOnce.completion(), None);
        assert_eq!(QosLevel::AtLeastOnce.completion(), Some(AckKind::PubAck));
        assert_eq!(QosLevel::ExactlyOnce.completion(), Some(AckKind::PubComp));
    }

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        assert_eq!(PublishStatus::Success.exit_code(), 0);
        assert_eq!(PublishStatus::AuthError.exit_code(), 3);
        assert_eq!(PublishStatus::TlsError.exit_code(), 4);
        assert_eq!(PublishStatus::NetworkError.exit_code(), 5);
        assert_eq!(PublishStatus::ConnectionLost.exit_code(), 5);
        assert_eq!(PublishStatus::TimedOut.exit_code(), 6);
        assert_eq!(PublishStatus::BrokerRejected.exit_code(), 7);
        assert_eq!(PublishStatus::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_outcome_report_serialization() {
        let outcome = PublishOutcome::failure(
            PublishError::auth("io.adafruit.com", "acct", "BadUserNamePassword"),
            1,
            Duration::from_millis(120),
        );
        assert_eq!(outcome.status, PublishStatus::AuthError);

        let json = serde_json::to_value(outcome.report("acct/feeds/beeper")).unwrap();
        assert_eq!(json["status"], "auth_error");
        assert_eq!(json["attempts"], 1);
        assert_eq!(json["elapsed_ms"], 120);
        assert!(json["error"].as_str().unwrap().contains("acct"));

        let success = PublishOutcome::success(2, Duration::from_secs(1));
        let json = serde_json::to_value(success.report("acct/feeds/beeper")).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
    }
}
