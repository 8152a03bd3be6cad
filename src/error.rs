//! Error taxonomy for publishing to a broker
//!
//! Every variant carries the context an operator needs (host, topic, user)
//! and maps onto a [`PublishStatus`] which drives retry decisions and the
//! process exit code.

use crate::publisher::PublishStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Exit code for configuration and request validation failures
pub const EXIT_CONFIG: i32 = 2;

/// Failure of one publish attempt or of the whole logical publish
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    #[error("Network error reaching {host}: {reason}")]
    Network { host: String, reason: String },

    #[error("TLS handshake with {host} failed: {reason}")]
    Tls { host: String, reason: String },

    #[error("Broker {host} rejected credentials for user '{username}': {reason}")]
    Auth {
        host: String,
        username: String,
        reason: String,
    },

    #[error("Broker rejected publish to '{topic}': {reason}")]
    BrokerRejected { topic: String, reason: String },

    #[error("Broker {host} refused the connection: {reason}")]
    ConnectRefused { host: String, reason: String },

    #[error("No acknowledgement for '{topic}' within {timeout:?}")]
    TimedOut { topic: String, timeout: Duration },

    #[error("Connection to {host} lost while publishing to '{topic}': {reason}")]
    ConnectionLost {
        host: String,
        topic: String,
        reason: String,
    },

    #[error("Publish to '{topic}' cancelled")]
    Cancelled { topic: String },

    #[error("Invalid publish request: {message}")]
    InvalidRequest { message: String },
}

impl PublishError {
    /// Outcome status this error resolves to
    ///
    /// A refused CONNECT and an invalid request are reported like a broker
    /// rejection: terminal and not retried.
    pub fn status(&self) -> PublishStatus {
        match self {
            PublishError::Network { .. } => PublishStatus::NetworkError,
            PublishError::Tls { .. } => PublishStatus::TlsError,
            PublishError::Auth { .. } => PublishStatus::AuthError,
            PublishError::BrokerRejected { .. }
            | PublishError::ConnectRefused { .. }
            | PublishError::InvalidRequest { .. } => PublishStatus::BrokerRejected,
            PublishError::TimedOut { .. } => PublishStatus::TimedOut,
            PublishError::ConnectionLost { .. } => PublishStatus::ConnectionLost,
            PublishError::Cancelled { .. } => PublishStatus::Cancelled,
        }
    }

    /// Whether a later attempt could succeed
    pub fn is_transient(&self) -> bool {
        self.status().is_transient()
    }

    pub fn network<H: Into<String>, R: AsRef<str>>(host: H, reason: R) -> Self {
        Self::Network {
            host: host.into(),
            reason: sanitize_reason(reason.as_ref()),
        }
    }

    pub fn tls<H: Into<String>, R: AsRef<str>>(host: H, reason: R) -> Self {
        Self::Tls {
            host: host.into(),
            reason: sanitize_reason(reason.as_ref()),
        }
    }

    pub fn auth<H: Into<String>, U: Into<String>, R: AsRef<str>>(
        host: H,
        username: U,
        reason: R,
    ) -> Self {
        Self::Auth {
            host: host.into(),
            username: username.into(),
            reason: sanitize_reason(reason.as_ref()),
        }
    }

    pub fn broker_rejected<T: Into<String>, R: AsRef<str>>(topic: T, reason: R) -> Self {
        Self::BrokerRejected {
            topic: topic.into(),
            reason: sanitize_reason(reason.as_ref()),
        }
    }

    pub fn connect_refused<H: Into<String>, R: AsRef<str>>(host: H, reason: R) -> Self {
        Self::ConnectRefused {
            host: host.into(),
            reason: sanitize_reason(reason.as_ref()),
        }
    }

    pub fn connection_lost<H: Into<String>, T: Into<String>, R: AsRef<str>>(
        host: H,
        topic: T,
        reason: R,
    ) -> Self {
        Self::ConnectionLost {
            host: host.into(),
            topic: topic.into(),
            reason: sanitize_reason(reason.as_ref()),
        }
    }

    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static AIO_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"aio_[A-Za-z0-9]{8,}").expect("aio key pattern is valid"));

const MAX_REASON_LEN: usize = 500;

/// Redact credential-looking tokens and cap the length of broker or
/// transport supplied reason strings before they reach logs
pub fn sanitize_reason(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();
    sanitized = AIO_KEY_PATTERN.replace_all(&sanitized, "aio_***").to_string();

    if sanitized.len() > MAX_REASON_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_REASON_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PublishError::network("h", "reset").status(),
            PublishStatus::NetworkError
        );
        assert_eq!(
            PublishError::tls("h", "bad cert").status(),
            PublishStatus::TlsError
        );
        assert_eq!(
            PublishError::auth("h", "u", "bad key").status(),
            PublishStatus::AuthError
        );
        assert_eq!(
            PublishError::broker_rejected("t", "not authorized").status(),
            PublishStatus::BrokerRejected
        );
        assert_eq!(
            PublishError::connect_refused("h", "UnsupportedProtocolVersion").status(),
            PublishStatus::BrokerRejected
        );
        assert_eq!(
            PublishError::invalid_request("empty topic").status(),
            PublishStatus::BrokerRejected
        );
        assert_eq!(
            PublishError::connection_lost("h", "t", "eof").status(),
            PublishStatus::ConnectionLost
        );
        assert_eq!(
            PublishError::Cancelled {
                topic: "t".to_string()
            }
            .status(),
            PublishStatus::Cancelled
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(PublishError::network("h", "unreachable").is_transient());
        assert!(PublishError::connection_lost("h", "t", "eof").is_transient());
        assert!(PublishError::TimedOut {
            topic: "t".to_string(),
            timeout: Duration::from_secs(1)
        }
        .is_transient());

        assert!(!PublishError::auth("h", "u", "bad").is_transient());
        assert!(!PublishError::tls("h", "bad").is_transient());
        assert!(!PublishError::broker_rejected("t", "denied").is_transient());
        assert!(!PublishError::connect_refused("h", "ClientIdentifierNotValid").is_transient());
    }

    #[test]
    fn test_display_carries_context() {
        let error = PublishError::auth("io.adafruit.com", "acct", "BadUserNamePassword");
        let text = error.to_string();
        assert!(text.contains("io.adafruit.com"));
        assert!(text.contains("acct"));

        let error = PublishError::TimedOut {
            topic: "acct/feeds/beeper".to_string(),
            timeout: Duration::from_secs(2),
        };
        assert!(error.to_string().contains("acct/feeds/beeper"));
        assert!(error.to_string().contains("2s"));
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let sanitized = sanitize_reason("refused: password=hunter2 token: abc456");
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_sanitize_redacts_aio_keys() {
        let sanitized = sanitize_reason("login with aio_AbCdEf1234567890 refused");
        assert!(!sanitized.contains("AbCdEf1234567890"));
        assert!(sanitized.contains("aio_***"));
    }

    #[test]
    fn test_sanitize_truncates_long_reasons() {
        let sanitized = sanitize_reason(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = sanitize_reason(&"x".repeat(500));
        assert_eq!(exact.len(), 500);
        assert!(!exact.contains("truncated"));
    }

    #[test]
    fn test_constructors_sanitize() {
        let error = PublishError::network("h", "key=aio_topsecretvalue");
        assert!(!error.to_string().contains("topsecretvalue"));
    }
}
