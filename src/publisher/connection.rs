//! Session lifecycle: connect, disconnect and reconnect
//!
//! A [`Session`] is the only owner of a transport link. Disconnecting takes
//! the link out of the session before closing it, so a second disconnect (or
//! a disconnect after a failure already tore the link down) has nothing left
//! to close.

use crate::connection_span;
use crate::error::PublishError;
use crate::transport::{BrokerTarget, Link, TlsMode, Transport, TransportError};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// The link died underneath us; `disconnect` still has to release it
    Failed,
}

/// One authenticated session with the broker
pub struct Session<L: Link> {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: String,
    state: SessionState,
    link: Option<L>,
    connected_at: Option<DateTime<Utc>>,
}

impl<L: Link> Session<L> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.link.is_some()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// Link for the in-flight publish, if the session still has one
    pub fn link_mut(&mut self) -> Option<&mut L> {
        self.link.as_mut()
    }

    /// Close and drop the link, leaving the session disconnected
    pub(crate) async fn release(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        if self.state != SessionState::Disconnected {
            transition(&self.host, self.state, SessionState::Disconnected);
            self.state = SessionState::Disconnected;
        }
        self.connected_at = None;
    }

    pub(crate) fn mark_failed(&mut self) {
        if self.state != SessionState::Disconnected {
            transition(&self.host, self.state, SessionState::Failed);
            self.state = SessionState::Failed;
        }
    }
}

impl<L: Link> std::fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("state", &self.state)
            .field("has_link", &self.link.is_some())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

fn transition(host: &str, from: SessionState, to: SessionState) {
    match to {
        SessionState::Failed => warn!(host, "Session state: {:?} -> {:?}", from, to),
        SessionState::Connected => info!(host, "Session state: {:?} -> {:?}", from, to),
        _ => debug!(host, "Session state: {:?} -> {:?}", from, to),
    }
}

/// Opens and releases sessions against one broker target
pub struct ConnectionManager<T: Transport> {
    transport: T,
    target: BrokerTarget,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, target: BrokerTarget) -> Self {
        Self { transport, target }
    }

    pub fn target(&self) -> &BrokerTarget {
        &self.target
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open an authenticated session
    ///
    /// TCP connect, TLS handshake and CONNACK together must finish within
    /// the target's connect timeout, otherwise the attempt fails as a
    /// network error.
    pub async fn connect(&self) -> Result<Session<T::Link>, PublishError> {
        let target = &self.target;
        let span = connection_span!(host = %target.host, port = target.port);

        async {
            transition(
                &target.host,
                SessionState::Disconnected,
                SessionState::Connecting,
            );
            let started = Instant::now();

            let opened = tokio::time::timeout(target.connect_timeout, self.transport.open(target))
                .await
                .map_err(|_| {
                    PublishError::network(
                        &target.host,
                        format!("connect timed out after {:?}", target.connect_timeout),
                    )
                })?;

            let link = opened.map_err(|e| self.connect_error(e))?;
            transition(&target.host, SessionState::Connecting, SessionState::Connected);
            debug!(elapsed = ?started.elapsed(), "Broker accepted session");

            Ok::<_, PublishError>(Session {
                host: target.host.clone(),
                port: target.port,
                tls: target.tls != TlsMode::Disabled,
                username: target.username().to_string(),
                state: SessionState::Connected,
                link: Some(link),
                connected_at: Some(Utc::now()),
            })
        }
        .instrument(span)
        .await
    }

    /// Release the session's transport; safe to call any number of times
    pub async fn disconnect(&self, session: &mut Session<T::Link>) {
        session.release().await;
    }

    /// Drop the current link and open a fresh one in its place
    pub async fn reconnect(&self, session: &mut Session<T::Link>) -> Result<(), PublishError> {
        self.disconnect(session).await;
        let fresh = self.connect().await?;
        *session = fresh;
        Ok(())
    }

    fn connect_error(&self, error: TransportError) -> PublishError {
        let host = &self.target.host;
        let error = match error {
            TransportError::Auth(reason) => {
                PublishError::auth(host, self.target.username(), reason)
            }
            TransportError::Tls(reason) => PublishError::tls(host, reason),
            TransportError::Network(reason) | TransportError::Closed(reason) => {
                PublishError::network(host, reason)
            }
            TransportError::Refused(reason) => PublishError::connect_refused(host, reason),
        };
        warn!(host = %host, error = %error, "Connect attempt failed");
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::testing::{ConnectBehavior, MockTransport};

    fn target() -> BrokerTarget {
        BrokerTarget::new("stub.local", 1883).with_credentials(Credentials::new("acct", "key"))
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_releases_transport() {
        let transport = MockTransport::new();
        let stats = transport.stats();
        let manager = ConnectionManager::new(transport, target());

        let mut session = manager.connect().await.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.username, "acct");
        assert!(session.connected_at().is_some());

        manager.disconnect(&mut session).await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(stats.opens(), 1);
        assert_eq!(stats.closes(), 1);
        assert_eq!(stats.open_links(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = MockTransport::new();
        let stats = transport.stats();
        let manager = ConnectionManager::new(transport, target());

        let mut session = manager.connect().await.unwrap();
        manager.disconnect(&mut session).await;
        manager.disconnect(&mut session).await;

        assert_eq!(stats.closes(), 1);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_maps_auth_failure() {
        let transport = MockTransport::new().with_fallback(ConnectBehavior::RejectCredentials);
        let stats = transport.stats();
        let manager = ConnectionManager::new(transport, target());

        let error = manager.connect().await.unwrap_err();
        assert!(matches!(
            error,
            PublishError::Auth { ref username, .. } if username == "acct"
        ));
        assert_eq!(stats.open_links(), 0);
    }

    #[tokio::test]
    async fn test_connect_maps_tls_and_network_failures() {
        let transport = MockTransport::new()
            .then_connect(ConnectBehavior::TlsFailure)
            .then_connect(ConnectBehavior::Unreachable);
        let manager = ConnectionManager::new(transport, target());

        assert!(matches!(
            manager.connect().await.unwrap_err(),
            PublishError::Tls { .. }
        ));
        assert!(matches!(
            manager.connect().await.unwrap_err(),
            PublishError::Network { .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_refusal_is_terminal() {
        let transport = MockTransport::new()
            .with_fallback(ConnectBehavior::Refuse("UnsupportedProtocolVersion".to_string()));
        let manager = ConnectionManager::new(transport, target());

        let error = manager.connect().await.unwrap_err();
        assert!(matches!(
            error,
            PublishError::ConnectRefused { ref reason, .. }
                if reason == "UnsupportedProtocolVersion"
        ));
        assert!(!error.is_transient());
        assert_eq!(manager.transport().stats().opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_network_error() {
        let transport = MockTransport::new().with_fallback(ConnectBehavior::Hang);
        let target = target().with_connect_timeout(std::time::Duration::from_secs(3));
        let manager = ConnectionManager::new(transport, target);

        let started = tokio::time::Instant::now();
        let error = manager.connect().await.unwrap_err();
        assert!(matches!(error, PublishError::Network { .. }));
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_reconnect_replaces_link() {
        let transport = MockTransport::new();
        let stats = transport.stats();
        let manager = ConnectionManager::new(transport, target());

        let mut session = manager.connect().await.unwrap();
        manager.reconnect(&mut session).await.unwrap();
        assert!(session.is_connected());
        assert_eq!(stats.opens(), 2);
        assert_eq!(manager.transport().stats().connect_attempts(), 2);
        assert_eq!(stats.closes(), 1);

        manager.disconnect(&mut session).await;
        assert_eq!(stats.open_links(), 0);
    }
}
