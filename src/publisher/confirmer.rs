//! Delivery confirmation for a single in-flight publish
//!
//! The confirmer writes one PUBLISH to the session's link and then waits for
//! whichever comes first: the acknowledgement the QoS level calls for, a
//! rejection or a closed link, the deadline, or cancellation.
//!
//! QoS 0 has no acknowledgement in MQTT. A QoS 0 publish is reported as a
//! success once the transport flushed it, which says nothing about whether
//! the broker accepted it. It is best-effort only.

use super::cancel::CancelToken;
use super::connection::Session;
use super::request::{PublishOutcome, PublishRequest, QosLevel};
use crate::error::PublishError;
use crate::transport::{Link, LinkEvent};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where an in-flight publish stands after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckProgress {
    Pending,
    Complete,
    Rejected(String),
    Lost(String),
}

/// Pure tracker of the events seen for one publish
#[derive(Debug, Clone)]
pub struct AckTracker {
    qos: QosLevel,
    written: bool,
}

impl AckTracker {
    pub fn new(qos: QosLevel) -> Self {
        Self {
            qos,
            written: false,
        }
    }

    pub fn written(&self) -> bool {
        self.written
    }

    /// Fold one link event into the progress of the publish
    ///
    /// `None` means the link's event stream ended.
    pub fn observe(&mut self, event: Option<LinkEvent>) -> AckProgress {
        match event {
            None => AckProgress::Lost("link closed before acknowledgement".to_string()),
            Some(LinkEvent::Closed(reason)) => AckProgress::Lost(reason),
            Some(LinkEvent::Rejected(reason)) => AckProgress::Rejected(reason),
            Some(LinkEvent::Written) => {
                self.written = true;
                match self.qos.completion() {
                    None => AckProgress::Complete,
                    Some(_) => AckProgress::Pending,
                }
            }
            Some(LinkEvent::Acknowledged(kind)) if self.qos.completion() == Some(kind) => {
                AckProgress::Complete
            }
            Some(LinkEvent::Acknowledged(_)) => AckProgress::Pending,
        }
    }
}

enum Wake {
    Cancelled,
    Deadline,
    Event(Option<LinkEvent>),
}

/// Sends one publish and waits for its confirmation
#[derive(Debug, Clone, Default)]
pub struct PublishConfirmer {
    cancel: CancelToken,
}

impl PublishConfirmer {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// Publish `request` on `session` and wait up to `timeout` for the
    /// confirmation its QoS requires
    ///
    /// Exactly one write reaches the link per call. The outcome always
    /// reports a single attempt; retrying is the caller's business.
    pub async fn publish<L: Link>(
        &self,
        session: &mut Session<L>,
        request: &PublishRequest,
        timeout: Duration,
    ) -> PublishOutcome {
        let started = Instant::now();
        match self.confirm(session, request, timeout).await {
            Ok(()) => PublishOutcome::success(1, started.elapsed()),
            Err(error) => PublishOutcome::failure(error, 1, started.elapsed()),
        }
    }

    /// Same as [`publish`](Self::publish) but returns the bare result
    pub async fn confirm<L: Link>(
        &self,
        session: &mut Session<L>,
        request: &PublishRequest,
        timeout: Duration,
    ) -> Result<(), PublishError> {
        let topic = request.topic();
        let deadline = Instant::now() + timeout;

        if self.cancel.is_cancelled() {
            return Err(self.cancelled(session, topic).await);
        }

        let host = session.host.clone();
        let Some(link) = session.link_mut() else {
            return Err(PublishError::connection_lost(
                host,
                topic,
                "session has no open link",
            ));
        };

        let write = link.publish(
            topic,
            request.payload().clone(),
            request.qos(),
            request.retain(),
        );
        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout_at(deadline, write) => Some(result),
        };
        match written {
            None => return Err(self.cancelled(session, topic).await),
            Some(Err(_)) => return Err(timed_out(topic, timeout)),
            Some(Ok(Err(e))) => {
                session.mark_failed();
                return Err(PublishError::connection_lost(host, topic, e.to_string()));
            }
            Some(Ok(Ok(()))) => {}
        }
        debug!(topic, qos = request.qos().as_u8(), "PUBLISH handed to transport");

        let mut tracker = AckTracker::new(request.qos());
        loop {
            let wake = match session.link_mut() {
                Some(link) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => Wake::Cancelled,
                        event = link.next_event() => Wake::Event(event),
                        _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
                    }
                }
                None => Wake::Event(None),
            };

            match wake {
                Wake::Cancelled => return Err(self.cancelled(session, topic).await),
                Wake::Deadline => {
                    warn!(topic, written = tracker.written(), "No acknowledgement before deadline");
                    return Err(timed_out(topic, timeout));
                }
                Wake::Event(event) => match tracker.observe(event) {
                    AckProgress::Pending => continue,
                    AckProgress::Complete => {
                        debug!(topic, "Publish confirmed");
                        return Ok(());
                    }
                    AckProgress::Rejected(reason) => {
                        return Err(PublishError::broker_rejected(topic, reason));
                    }
                    AckProgress::Lost(reason) => {
                        session.mark_failed();
                        return Err(PublishError::connection_lost(host, topic, reason));
                    }
                },
            }
        }
    }

    /// Cancellation closes the transport before reporting
    async fn cancelled<L: Link>(&self, session: &mut Session<L>, topic: &str) -> PublishError {
        debug!(topic, "Publish cancelled, closing transport");
        session.release().await;
        PublishError::Cancelled {
            topic: topic.to_string(),
        }
    }
}

fn timed_out(topic: &str, timeout: Duration) -> PublishError {
    PublishError::TimedOut {
        topic: topic.to_string(),
        timeout,
    }
}
