//! Pure routing of rumqttc events and errors
//!
//! Nothing here performs I/O: events coming out of either rumqttc event loop
//! are classified into [`EventRoute`]s, and connection errors into
//! [`TransportError`]s, so the link and pump only act on the decision.
//! MQTT 3.1.1 acknowledgements carry no reason code, so every one of them is
//! a success; v5 ones are checked.

use crate::transport::{AckKind, LinkEvent, TransportError};
use rumqttc::v5::mqttbytes::v5::{
    ConnectReturnCode, DisconnectReasonCode, Packet, PubAckReason, PubCompReason, PubRecReason,
};
use rumqttc::v5::{ConnectionError, Event};
use rumqttc::Outgoing;

/// Pure event routing decisions
pub struct EventRouter;

impl EventRouter {
    /// Route an event from the MQTT 3.1.1 event loop
    pub fn route_v311_event(event: &rumqttc::Event) -> EventRoute {
        match event {
            rumqttc::Event::Incoming(packet) => match packet {
                rumqttc::Packet::ConnAck(connack) => match &connack.code {
                    rumqttc::ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(Self::classify_v311_connect_code(code)),
                },
                rumqttc::Packet::PubAck(_) => EventRoute::Acknowledged(AckKind::PubAck),
                rumqttc::Packet::PubRec(_) => EventRoute::Acknowledged(AckKind::PubRec),
                rumqttc::Packet::PubComp(_) => EventRoute::Acknowledged(AckKind::PubComp),
                rumqttc::Packet::Disconnect => EventRoute::Disconnected {
                    rejected: false,
                    reason: "DISCONNECT".to_string(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            rumqttc::Event::Outgoing(outgoing) => Self::route_outgoing(outgoing),
        }
    }

    /// Route an event from the MQTT v5 event loop
    pub fn route_v5_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(connack) => match &connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(Self::classify_v5_connect_code(code)),
                },
                Packet::PubAck(puback) => match &puback.reason {
                    PubAckReason::Success | PubAckReason::NoMatchingSubscribers => {
                        EventRoute::Acknowledged(AckKind::PubAck)
                    }
                    other => EventRoute::AckRejected(format!("PUBACK {other:?}")),
                },
                Packet::PubRec(pubrec) => match &pubrec.reason {
                    PubRecReason::Success | PubRecReason::NoMatchingSubscribers => {
                        EventRoute::Acknowledged(AckKind::PubRec)
                    }
                    other => EventRoute::AckRejected(format!("PUBREC {other:?}")),
                },
                Packet::PubComp(pubcomp) => match &pubcomp.reason {
                    PubCompReason::Success => EventRoute::Acknowledged(AckKind::PubComp),
                    other => EventRoute::AckRejected(format!("PUBCOMP {other:?}")),
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    rejected: Self::is_rejection(&disconnect.reason_code),
                    reason: format!("{:?}", disconnect.reason_code),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => Self::route_outgoing(outgoing),
        }
    }

    /// Outgoing events look the same for both protocols
    fn route_outgoing(outgoing: &Outgoing) -> EventRoute {
        match outgoing {
            Outgoing::Publish(_) => EventRoute::PublishWritten,
            Outgoing::Disconnect => EventRoute::ClientDisconnected,
            _ => EventRoute::OutgoingEvent,
        }
    }

    /// Link event forwarded to the publisher for a route, if any
    pub fn link_event(route: &EventRoute) -> Option<LinkEvent> {
        match route {
            EventRoute::PublishWritten => Some(LinkEvent::Written),
            EventRoute::Acknowledged(kind) => Some(LinkEvent::Acknowledged(*kind)),
            EventRoute::AckRejected(reason) => Some(LinkEvent::Rejected(reason.clone())),
            EventRoute::Disconnected { rejected, reason } => Some(if *rejected {
                LinkEvent::Rejected(format!("broker disconnected: {reason}"))
            } else {
                LinkEvent::Closed(format!("broker disconnected: {reason}"))
            }),
            EventRoute::ConnectionAcknowledged
            | EventRoute::ConnectionRefused(_)
            | EventRoute::ClientDisconnected
            | EventRoute::InfrastructureEvent(_)
            | EventRoute::OutgoingEvent => None,
        }
    }

    /// Classify an MQTT 3.1.1 CONNACK failure code
    ///
    /// Credential codes are authentication failures, an unavailable server
    /// is worth another attempt, everything else is a terminal refusal.
    pub fn classify_v311_connect_code(code: &rumqttc::ConnectReturnCode) -> TransportError {
        let reason = format!("{code:?}");
        match code {
            rumqttc::ConnectReturnCode::BadUserNamePassword
            | rumqttc::ConnectReturnCode::NotAuthorized => TransportError::Auth(reason),
            rumqttc::ConnectReturnCode::ServiceUnavailable => TransportError::Network(reason),
            _ => TransportError::Refused(reason),
        }
    }

    /// Classify an MQTT v5 CONNACK failure code
    ///
    /// Credential and ban codes are authentication failures, capacity codes
    /// are worth another attempt, everything else is a terminal refusal.
    pub fn classify_v5_connect_code(code: &ConnectReturnCode) -> TransportError {
        let reason = format!("{code:?}");
        match code {
            ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::Banned
            | ConnectReturnCode::BadAuthenticationMethod => TransportError::Auth(reason),
            ConnectReturnCode::ServerUnavailable
            | ConnectReturnCode::ServerBusy
            | ConnectReturnCode::ConnectionRateExceeded => TransportError::Network(reason),
            _ => TransportError::Refused(reason),
        }
    }

    /// Classify an error returned by the MQTT 3.1.1 `EventLoop::poll`
    pub fn classify_v311_connection_error(error: &rumqttc::ConnectionError) -> TransportError {
        match error {
            rumqttc::ConnectionError::ConnectionRefused(code) => {
                Self::classify_v311_connect_code(code)
            }
            rumqttc::ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
            rumqttc::ConnectionError::Io(e) => TransportError::Network(e.to_string()),
            other => TransportError::Network(other.to_string()),
        }
    }

    /// Classify an error returned by the MQTT v5 `EventLoop::poll`
    pub fn classify_v5_connection_error(error: &ConnectionError) -> TransportError {
        match error {
            ConnectionError::ConnectionRefused(code) => Self::classify_v5_connect_code(code),
            ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
            ConnectionError::Io(e) => TransportError::Network(e.to_string()),
            other => TransportError::Network(other.to_string()),
        }
    }

    /// DISCONNECT reasons that mean the broker refused what we sent
    fn is_rejection(reason: &DisconnectReasonCode) -> bool {
        matches!(
            reason,
            DisconnectReasonCode::NotAuthorized
                | DisconnectReasonCode::TopicNameInvalid
                | DisconnectReasonCode::PacketTooLarge
                | DisconnectReasonCode::PayloadFormatInvalid
        )
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with success code
    ConnectionAcknowledged,
    /// CONNACK with a failure code
    ConnectionRefused(TransportError),
    /// Our PUBLISH left the client
    PublishWritten,
    /// Acknowledgement with a success reason code
    Acknowledged(AckKind),
    /// Acknowledgement with a failure reason code
    AckRejected(String),
    /// Broker sent DISCONNECT
    Disconnected { rejected: bool, reason: String },
    /// Our DISCONNECT left the client
    ClientDisconnected,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Other outgoing event (handled by rumqttc)
    OutgoingEvent,
}
