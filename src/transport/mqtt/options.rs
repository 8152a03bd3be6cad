//! Pure mapping from a [`BrokerTarget`] to rumqttc options
//!
//! rumqttc keeps MQTT 3.1.1 at its crate root and MQTT v5 under `v5`, each
//! with its own options and QoS types, so there is one builder per protocol.

use crate::publisher::QosLevel;
use crate::transport::{BrokerTarget, TlsMode};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// Largest PUBLISH we hand to the broker; Adafruit IO caps feed values at 100KB
const MAX_PACKET_SIZE: u32 = 128 * 1024;

/// rumqttc's v5 options reject anything shorter
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Keep-alive actually sent, whole seconds and at least [`MIN_KEEP_ALIVE`]
pub fn effective_keep_alive(target: &BrokerTarget) -> Duration {
    Duration::from_secs(target.keep_alive.as_secs()).max(MIN_KEEP_ALIVE)
}

fn socket_transport(tls: &TlsMode) -> Option<RumqttcTransport> {
    match tls {
        TlsMode::Disabled => None,
        TlsMode::SystemRoots => Some(RumqttcTransport::tls_with_default_config()),
        TlsMode::CustomCa(ca) => Some(RumqttcTransport::tls(ca.clone(), None, None)),
    }
}

/// Configure MQTT 3.1.1 options for one connection attempt
pub fn configure_mqtt_options(target: &BrokerTarget, client_id: &str) -> rumqttc::MqttOptions {
    let mut mqtt_options = rumqttc::MqttOptions::new(client_id, target.host.as_str(), target.port);

    if let Some(transport) = socket_transport(&target.tls) {
        mqtt_options.set_transport(transport);
    }

    if let Some(credentials) = &target.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.key);
    }

    mqtt_options.set_keep_alive(effective_keep_alive(target));
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE as usize, MAX_PACKET_SIZE as usize);

    mqtt_options
}

/// Configure MQTT v5 options for one connection attempt
pub fn configure_mqtt_v5_options(
    target: &BrokerTarget,
    client_id: &str,
) -> rumqttc::v5::MqttOptions {
    let mut mqtt_options =
        rumqttc::v5::MqttOptions::new(client_id, target.host.as_str(), target.port);

    if let Some(transport) = socket_transport(&target.tls) {
        mqtt_options.set_transport(transport);
    }

    if let Some(credentials) = &target.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.key);
    }

    mqtt_options.set_keep_alive(effective_keep_alive(target));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    mqtt_options
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<QosLevel> for rumqttc::v5::mqttbytes::QoS {
    fn from(qos: QosLevel) -> Self {
        use rumqttc::v5::mqttbytes::QoS;
        match qos {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}
