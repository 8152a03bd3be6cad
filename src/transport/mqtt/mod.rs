//! MQTT 3.1.1 and v5 transport backed by rumqttc
//!
//! Pure decisions are kept apart from I/O so they can be unit tested:
//!
//! - [`options`] - Pure mapping from a broker target to rumqttc options
//! - [`event_router`] - Pure classification of rumqttc events and errors
//! - [`link`] - Impure connection setup and the event pump
//!
//! # Usage
//!
//! ```rust,no_run
//! use feedping::config::Credentials;
//! use feedping::publisher::QosLevel;
//! use feedping::transport::mqtt::MqttTransport;
//! use feedping::transport::{BrokerTarget, Link, Transport};
//!
//! # tokio_test::block_on(async {
//! let target = BrokerTarget::new("localhost", 1883)
//!     .with_credentials(Credentials::new("acct", "aio_key"));
//!
//! let mut link = MqttTransport::new().open(&target).await?;
//! link.publish("acct/feeds/beeper", "true".into(), QosLevel::AtLeastOnce, false)
//!     .await?;
//! while let Some(event) = link.next_event().await {
//!     println!("{event:?}");
//! }
//! link.close().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod event_router;
pub mod link;
pub mod options;

pub use event_router::{EventRoute, EventRouter};
pub use link::{MqttLink, MqttTransport};
pub use options::{
    configure_mqtt_options, configure_mqtt_v5_options, effective_keep_alive, MIN_KEEP_ALIVE,
};
