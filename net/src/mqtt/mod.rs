//! MQTT 3.1.1 client over a single TCP session.

pub mod client;
pub mod packet;
pub mod topics;

pub use client::{MAX_PUBLISH_PAYLOAD, MqttClient, MqttInput, MqttState};
pub use packet::{MqttError, Packet, QoS};
pub use topics::{MAX_TOPIC_LEN, MAX_TOPICS, TopicIndex, TopicTable};
