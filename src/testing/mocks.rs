//! Mock implementations for testing
//!
//! [`MockTransport`] plays a scripted broker: each `open` pops the next
//! [`ConnectBehavior`] from its script (falling back to a default once the
//! script is empty), and every link it hands out reacts to publishes
//! according to a [`LinkBehavior`]. Counters and captured messages live in a
//! shared [`TransportStats`] that tests keep after the transport has been
//! moved into a publisher.

use crate::publisher::QosLevel;
use crate::transport::{AckKind, BrokerTarget, Link, LinkEvent, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How the scripted broker answers one connection attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    /// CONNACK success; the link then behaves as given
    Accept(LinkBehavior),
    /// CONNACK with bad username or password
    RejectCredentials,
    /// CONNACK with a terminal failure code, e.g. an unsupported protocol
    Refuse(String),
    /// Handshake fails certificate validation
    TlsFailure,
    /// TCP connect fails
    Unreachable,
    /// Never answers
    Hang,
}

/// How an accepted link reacts to a publish
#[derive(Debug, Clone, PartialEq)]
pub enum LinkBehavior {
    /// Send the acknowledgements the QoS level calls for
    Acknowledge,
    /// Acknowledge, but only after the given delay
    AcknowledgeAfter(Duration),
    /// Take the write and stay silent
    NeverAcknowledge,
    /// Reset the connection right after the write
    DropConnection,
    /// Answer with a failure reason code
    Reject(String),
}

/// A publish as the scripted broker received it
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retain: bool,
}

/// Counters shared by a mock transport and all of its links
#[derive(Debug, Default)]
pub struct TransportStats {
    connect_attempts: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    writes: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
}

impl TransportStats {
    /// Every call to `open`, successful or not
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Links handed out
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Links closed, each counted once
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Links opened but never closed
    pub fn open_links(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }
}

/// Scripted transport for testing
#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<VecDeque<ConnectBehavior>>,
    fallback: ConnectBehavior,
    stats: Arc<TransportStats>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ConnectBehavior::Accept(LinkBehavior::Acknowledge),
            stats: Arc::new(TransportStats::default()),
        }
    }
}

impl MockTransport {
    /// Transport whose links always acknowledge
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer for the next unscripted connection attempt
    pub fn then_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.script.get_mut().push_back(behavior);
        self
    }

    /// Answer used once the script runs out
    pub fn with_fallback(mut self, behavior: ConnectBehavior) -> Self {
        self.fallback = behavior;
        self
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn open(&self, target: &BrokerTarget) -> Result<MockLink, TransportError> {
        self.stats.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match behavior {
            ConnectBehavior::Accept(link_behavior) => {
                self.stats.opens.fetch_add(1, Ordering::SeqCst);
                Ok(MockLink {
                    behavior: link_behavior,
                    stats: Arc::clone(&self.stats),
                    events: VecDeque::new(),
                    closed: false,
                })
            }
            ConnectBehavior::RejectCredentials => Err(TransportError::Auth(format!(
                "BadUserNamePassword for {}",
                target.username()
            ))),
            ConnectBehavior::Refuse(code) => Err(TransportError::Refused(code)),
            ConnectBehavior::TlsFailure => Err(TransportError::Tls(
                "invalid peer certificate: UnknownIssuer".to_string(),
            )),
            ConnectBehavior::Unreachable => Err(TransportError::Network(format!(
                "connection refused ({}:{})",
                target.host, target.port
            ))),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Link handed out by [`MockTransport`]
#[derive(Debug)]
pub struct MockLink {
    behavior: LinkBehavior,
    stats: Arc<TransportStats>,
    /// Pending events and the delay before each is delivered
    events: VecDeque<(Duration, LinkEvent)>,
    closed: bool,
}

impl MockLink {
    fn acknowledgements(qos: QosLevel) -> Vec<LinkEvent> {
        match qos {
            QosLevel::AtMostOnce => vec![],
            QosLevel::AtLeastOnce => vec![LinkEvent::Acknowledged(AckKind::PubAck)],
            QosLevel::ExactlyOnce => vec![
                LinkEvent::Acknowledged(AckKind::PubRec),
                LinkEvent::Acknowledged(AckKind::PubComp),
            ],
        }
    }
}

#[async_trait]
impl Link for MockLink {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed("mock link closed".to_string()));
        }

        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        self.stats.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });

        self.events.push_back((Duration::ZERO, LinkEvent::Written));
        match &self.behavior {
            LinkBehavior::Acknowledge => {
                for event in Self::acknowledgements(qos) {
                    self.events.push_back((Duration::ZERO, event));
                }
            }
            LinkBehavior::AcknowledgeAfter(delay) => {
                for (i, event) in Self::acknowledgements(qos).into_iter().enumerate() {
                    let wait = if i == 0 { *delay } else { Duration::ZERO };
                    self.events.push_back((wait, event));
                }
            }
            LinkBehavior::NeverAcknowledge => {}
            LinkBehavior::DropConnection => {
                self.events.push_back((
                    Duration::ZERO,
                    LinkEvent::Closed("connection reset by peer".to_string()),
                ));
            }
            LinkBehavior::Reject(reason) => {
                self.events
                    .push_back((Duration::ZERO, LinkEvent::Rejected(reason.clone())));
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        if self.closed {
            return None;
        }
        match self.events.front() {
            Some((delay, _)) if !delay.is_zero() => {
                let delay = *delay;
                tokio::time::sleep(delay).await;
                if let Some(front) = self.events.front_mut() {
                    front.0 = Duration::ZERO;
                }
            }
            Some(_) => {}
            // Silent broker
            None => std::future::pending::<()>().await,
        }
        self.events.pop_front().map(|(_, event)| event)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.events.clear();
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let transport = MockTransport::new()
            .then_connect(ConnectBehavior::Unreachable)
            .with_fallback(ConnectBehavior::RejectCredentials);
        let target = BrokerTarget::new("stub.local", 1883);

        assert!(matches!(
            transport.open(&target).await,
            Err(TransportError::Network(_))
        ));
        assert!(matches!(
            transport.open(&target).await,
            Err(TransportError::Auth(_))
        ));
        assert!(matches!(
            transport.open(&target).await,
            Err(TransportError::Auth(_))
        ));
        assert_eq!(transport.stats().connect_attempts(), 3);
        assert_eq!(transport.stats().opens(), 0);
    }

    #[tokio::test]
    async fn test_link_records_and_acknowledges() {
        let transport = MockTransport::new();
        let stats = transport.stats();
        let mut link = transport
            .open(&BrokerTarget::new("stub.local", 1883))
            .await
            .unwrap();

        link.publish(
            "acct/feeds/beeper",
            Bytes::from_static(b"true"),
            QosLevel::ExactlyOnce,
            false,
        )
        .await
        .unwrap();

        assert_eq!(link.next_event().await, Some(LinkEvent::Written));
        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Acknowledged(AckKind::PubRec))
        );
        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Acknowledged(AckKind::PubComp))
        );

        let published = stats.published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, Bytes::from_static(b"true"));

        link.close().await;
        link.close().await;
        assert_eq!(stats.closes(), 1);
        assert_eq!(link.next_event().await, None);
    }

    #[tokio::test]
    async fn test_dropped_link_reports_closed() {
        let transport = MockTransport::new()
            .with_fallback(ConnectBehavior::Accept(LinkBehavior::DropConnection));
        let mut link = transport
            .open(&BrokerTarget::new("stub.local", 1883))
            .await
            .unwrap();

        link.publish("t", Bytes::from_static(b"x"), QosLevel::AtLeastOnce, false)
            .await
            .unwrap();
        assert_eq!(link.next_event().await, Some(LinkEvent::Written));
        assert!(matches!(link.next_event().await, Some(LinkEvent::Closed(_))));
    }
}
