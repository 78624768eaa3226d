pub mod config;
pub mod client;

pub use config::MqttConfig;
pub use client::{MqttEvent, MqttService};
pub use rumqttc::QoS;
