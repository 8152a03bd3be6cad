//! Reliable publishing: connect, confirm, retry
//!
//! A [`Publisher`] turns one [`PublishRequest`] into one [`PublishOutcome`]:
//!
//! - [`connection`] - Session lifecycle on top of a [`Transport`]
//! - [`confirmer`] - One PUBLISH and the wait for its acknowledgement
//! - [`retry`] - Pure decisions on whether and when to try again
//! - [`cancel`] - Cancellation shared with signal handlers
//! - [`request`] - Requests, statuses and outcomes
//!
//! Every failed attempt tears its session down before the next one starts,
//! and the last session is released before `publish` returns, so no
//! transport outlives the call.

pub mod cancel;
pub mod confirmer;
pub mod connection;
pub mod request;
pub mod retry;

pub use cancel::CancelToken;
pub use confirmer::{AckProgress, AckTracker, PublishConfirmer};
pub use connection::{ConnectionManager, Session, SessionState};
pub use request::{OutcomeReport, PublishOutcome, PublishRequest, PublishStatus, QosLevel};
pub use retry::{GiveUpReason, RetryDecision, RetryPolicy};

use crate::error::PublishError;
use crate::publish_span;
use crate::transport::{BrokerTarget, Transport};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

/// Publishes with delivery confirmation and bounded retry
pub struct Publisher<T: Transport> {
    connections: ConnectionManager<T>,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancelToken,
}

impl<T: Transport> Publisher<T> {
    /// `timeout` bounds the acknowledgement wait of each attempt
    pub fn new(transport: T, target: BrokerTarget, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            connections: ConnectionManager::new(transport, target),
            retry,
            timeout,
            cancel: CancelToken::new(),
        }
    }

    /// Share cancellation with a signal handler or another task
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn connections(&self) -> &ConnectionManager<T> {
        &self.connections
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Publish until confirmed, a terminal failure, or the retry bounds
    /// run out
    pub async fn publish(&self, request: &PublishRequest) -> PublishOutcome {
        let target = self.connections.target();
        let span = publish_span!(
            host = %target.host,
            topic = %request.topic(),
            qos = request.qos().as_u8()
        );
        self.publish_with_retry(request).instrument(span).await
    }

    async fn publish_with_retry(&self, request: &PublishRequest) -> PublishOutcome {
        let started = Instant::now();
        let confirmer = PublishConfirmer::new(self.cancel.clone());
        let mut attempt: u32 = 1;

        loop {
            let result = self.attempt(&confirmer, request).await;
            let elapsed = started.elapsed();

            let error = match result {
                Ok(()) => {
                    info!(attempt, elapsed = ?elapsed, "Publish confirmed by broker");
                    return PublishOutcome::success(attempt, elapsed);
                }
                Err(error) => error,
            };

            warn!(
                host = %self.connections.target().host,
                topic = %request.topic(),
                attempt,
                error = %error,
                "Publish attempt failed"
            );

            match self.retry.decide(error.status(), attempt, elapsed) {
                RetryDecision::Retry {
                    attempt: next,
                    delay,
                } => {
                    info!(next_attempt = next, delay = ?delay, "Retrying publish");
                    if !self.cancel.sleep(delay).await {
                        let cancelled = PublishError::Cancelled {
                            topic: request.topic().to_string(),
                        };
                        return PublishOutcome::failure(cancelled, attempt, started.elapsed());
                    }
                    attempt = next;
                }
                RetryDecision::GiveUp(reason) => {
                    warn!(attempts = attempt, reason = ?reason, "Giving up on publish");
                    return PublishOutcome::failure(error, attempt, started.elapsed());
                }
            }
        }
    }

    /// One attempt on a fresh session, released before returning
    async fn attempt(
        &self,
        confirmer: &PublishConfirmer,
        request: &PublishRequest,
    ) -> Result<(), PublishError> {
        let cancelled = || PublishError::Cancelled {
            topic: request.topic().to_string(),
        };
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            connected = self.connections.connect() => Some(connected),
        };
        let mut session = match connected {
            None => return Err(cancelled()),
            Some(connected) => connected?,
        };

        let result = confirmer.confirm(&mut session, request, self.timeout).await;
        self.connections.disconnect(&mut session).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::testing::{ConnectBehavior, LinkBehavior, MockTransport};

    fn target() -> BrokerTarget {
        BrokerTarget::new("stub.local", 1883).with_credentials(Credentials::new("acct", "key"))
    }

    fn request() -> PublishRequest {
        PublishRequest::new("acct/feeds/beeper", "true", QosLevel::AtLeastOnce).unwrap()
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let transport = MockTransport::new();
        let stats = transport.stats();
        let publisher = Publisher::new(
            transport,
            target(),
            RetryPolicy::default(),
            Duration::from_secs(2),
        );

        let outcome = publisher.publish(&request()).await;
        assert_eq!(outcome.status, PublishStatus::Success);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.error.is_none());
        assert_eq!(stats.writes(), 1);
        assert_eq!(stats.open_links(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = MockTransport::new().with_fallback(ConnectBehavior::Unreachable);
        let stats = transport.stats();
        let publisher = Publisher::new(
            transport,
            target(),
            RetryPolicy::default().with_max_attempts(3),
            Duration::from_secs(2),
        );

        assert_eq!(publisher.retry_policy().max_attempts, 3);
        assert_eq!(publisher.connections().target().host, "stub.local");

        let outcome = publisher.publish(&request()).await;
        assert_eq!(outcome.status, PublishStatus::NetworkError);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(stats.connect_attempts(), 3);
        assert_eq!(stats.opens(), 0);
    }

    #[tokio::test]
    async fn test_broker_rejection_is_terminal() {
        let transport = MockTransport::new().with_fallback(ConnectBehavior::Accept(
            LinkBehavior::Reject("NotAuthorized".to_string()),
        ));
        let stats = transport.stats();
        let publisher = Publisher::new(
            transport,
            target(),
            RetryPolicy::default(),
            Duration::from_secs(2),
        );

        let outcome = publisher.publish(&request()).await;
        assert_eq!(outcome.status, PublishStatus::BrokerRejected);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(stats.open_links(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let transport = MockTransport::new();
        let stats = transport.stats();
        let publisher = Publisher::new(
            transport,
            target(),
            RetryPolicy::default(),
            Duration::from_secs(2),
        );
        publisher.cancel_token().cancel();

        let outcome = publisher.publish(&request()).await;
        assert_eq!(outcome.status, PublishStatus::Cancelled);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(stats.opens(), 0);
    }
}
