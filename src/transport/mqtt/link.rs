//! Impure I/O for the rumqttc-backed transport
//!
//! [`MqttTransport::open`] drives the rumqttc event loop in the caller's task
//! until CONNACK, so connect failures come back as values. After that the
//! event loop moves into a spawned pump task that keeps the socket serviced
//! and forwards publish-related events to the [`MqttLink`] over a channel.
//! Both protocol revisions share the pump; only the client handle and the
//! event classification differ.

use super::event_router::{EventRoute, EventRouter};
use super::options::{configure_mqtt_options, configure_mqtt_v5_options};
use crate::publisher::QosLevel;
use crate::transport::{
    BrokerTarget, Link, LinkEvent, ProtocolVersion, Transport, TransportError,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// How long `close` waits for the pump to flush DISCONNECT
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// An event loop whose output is already classified
#[async_trait]
trait RoutedEventLoop: Send + 'static {
    async fn next_route(&mut self) -> Result<EventRoute, TransportError>;
}

#[async_trait]
impl RoutedEventLoop for rumqttc::EventLoop {
    async fn next_route(&mut self) -> Result<EventRoute, TransportError> {
        self.poll()
            .await
            .map(|event| EventRouter::route_v311_event(&event))
            .map_err(|e| EventRouter::classify_v311_connection_error(&e))
    }
}

#[async_trait]
impl RoutedEventLoop for rumqttc::v5::EventLoop {
    async fn next_route(&mut self) -> Result<EventRoute, TransportError> {
        self.poll()
            .await
            .map(|event| EventRouter::route_v5_event(&event))
            .map_err(|e| EventRouter::classify_v5_connection_error(&e))
    }
}

/// Client handle for whichever protocol the link speaks
enum MqttClient {
    V311(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

impl MqttClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), String> {
        match self {
            MqttClient::V311(client) => client
                .publish_bytes(topic, qos.into(), retain, payload)
                .await
                .map_err(|e| e.to_string()),
            MqttClient::V5(client) => client
                .publish(topic, qos.into(), retain, payload)
                .await
                .map_err(|e| e.to_string()),
        }
    }

    async fn disconnect(&self) -> Result<(), String> {
        match self {
            MqttClient::V311(client) => client.disconnect().await.map_err(|e| e.to_string()),
            MqttClient::V5(client) => client.disconnect().await.map_err(|e| e.to_string()),
        }
    }
}

/// Transport that speaks MQTT 3.1.1 or v5 through rumqttc
#[derive(Debug, Clone, Default)]
pub struct MqttTransport;

impl MqttTransport {
    pub fn new() -> Self {
        Self
    }

    /// Poll the event loop until the broker answers CONNECT
    async fn wait_for_connack<E: RoutedEventLoop>(event_loop: &mut E) -> Result<(), TransportError> {
        loop {
            match event_loop.next_route().await? {
                EventRoute::ConnectionAcknowledged => return Ok(()),
                EventRoute::ConnectionRefused(error) => return Err(error),
                route => debug!(target: "mqtt_transport", "Pre-CONNACK event: {:?}", route),
            }
        }
    }

    /// Wait for CONNACK, then hand the event loop to a pump task
    async fn establish<E: RoutedEventLoop>(
        client: MqttClient,
        mut event_loop: E,
    ) -> Result<MqttLink, TransportError> {
        Self::wait_for_connack(&mut event_loop).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(run_event_pump(event_loop, events_tx, shutdown_rx));

        Ok(MqttLink {
            client,
            events: events_rx,
            shutdown_tx,
            pump: Some(pump),
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    type Link = MqttLink;

    async fn open(&self, target: &BrokerTarget) -> Result<MqttLink, TransportError> {
        let client_id = target.generate_client_id();
        debug!(
            target: "mqtt_transport",
            host = %target.host,
            port = target.port,
            protocol = %target.protocol,
            client_id = %client_id,
            "Opening MQTT connection"
        );

        match target.protocol {
            ProtocolVersion::V311 => {
                let options = configure_mqtt_options(target, &client_id);
                let (client, event_loop) = rumqttc::AsyncClient::new(options, REQUEST_CAPACITY);
                Self::establish(MqttClient::V311(client), event_loop).await
            }
            ProtocolVersion::V5 => {
                let options = configure_mqtt_v5_options(target, &client_id);
                let (client, event_loop) =
                    rumqttc::v5::AsyncClient::new(options, REQUEST_CAPACITY);
                Self::establish(MqttClient::V5(client), event_loop).await
            }
        }
    }
}

/// Keep the event loop polled and forward publish-related events
///
/// Exits on shutdown, after our DISCONNECT has been flushed, on any
/// connection error, or once the link stops listening. Dropping the event
/// loop closes the socket.
async fn run_event_pump<E: RoutedEventLoop>(
    mut event_loop: E,
    events: mpsc::UnboundedSender<LinkEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!(target: "mqtt_transport", "Shutdown signal received, stopping event pump");
                    break;
                }
            }

            routed = event_loop.next_route() => {
                match routed {
                    Ok(EventRoute::ClientDisconnected) => break,
                    Ok(route) => {
                        if let Some(link_event) = EventRouter::link_event(&route) {
                            if events.send(link_event).is_err() {
                                break;
                            }
                        } else {
                            debug!(target: "mqtt_transport", "MQTT event: {:?}", route);
                        }
                    }
                    Err(e) => {
                        warn!(target: "mqtt_transport", "MQTT event loop error: {}", e);
                        let _ = events.send(LinkEvent::Closed(e.to_string()));
                        break;
                    }
                }
            }
        }
    }
    debug!(target: "mqtt_transport", "MQTT event pump stopped");
}

/// Established MQTT session backed by a pump task
pub struct MqttLink {
    client: MqttClient,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    shutdown_tx: watch::Sender<bool>,
    pump: Option<JoinHandle<()>>,
    closed: bool,
}

#[async_trait]
impl Link for MqttLink {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed("link already closed".to_string()));
        }

        self.client
            .publish(topic, payload, qos, retain)
            .await
            .map_err(TransportError::Closed)
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Best effort DISCONNECT; the pump exits once it has been flushed
        if let Err(e) = self.client.disconnect().await {
            debug!(target: "mqtt_transport", "DISCONNECT not queued: {}", e);
        }

        if let Some(mut handle) = self.pump.take() {
            match tokio::time::timeout(CLOSE_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!(target: "mqtt_transport", "Event pump shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event pump task ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event pump didn't stop after DISCONNECT, forcing shutdown");
                    let _ = self.shutdown_tx.send(true);
                    handle.abort();
                }
            }
        }

        info!("MQTT link closed");
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        // Signal shutdown to the pump if it is still running
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.pump.take() {
            handle.abort();
        }
    }
}
