use hostname::get as get_hostname;
use std::env;

use isybridge_core::{DEFAULT_CONTROL_PREFIX, DEFAULT_EVENT_PREFIX};

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub event_prefix: String,
    pub control_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            clean_session: true,
            event_prefix: DEFAULT_EVENT_PREFIX.to_string(),
            control_prefix: DEFAULT_CONTROL_PREFIX.to_string(),
        }
    }
}

impl MqttConfig {
    pub fn from_env() -> Self {
        let mut cfg = MqttConfig::default();

        if let Ok(v) = env::var("MQTT_BROKER_HOST") {
            if !v.is_empty() {
                cfg.host = v;
            }
        }
        if let Ok(v) = env::var("MQTT_BROKER_PORT") {
            match v.parse::<u16>() {
                Ok(p) => cfg.port = p,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid MQTT_BROKER_PORT"),
            }
        }
        if let Ok(v) = env::var("MQTT_CLIENT_ID") {
            if !v.is_empty() {
                cfg.client_id = v;
            }
        }
        if let Ok(v) = env::var("MQTT_USERNAME") {
            if !v.is_empty() {
                cfg.username = Some(v);
            }
        }
        if let Ok(v) = env::var("MQTT_PASSWORD") {
            if !v.is_empty() {
                cfg.password = Some(v);
            }
        }
        if let Ok(v) = env::var("MQTT_KEEP_ALIVE_SECS") {
            match v.parse::<u16>() {
                Ok(s) => cfg.keep_alive_secs = s,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid MQTT_KEEP_ALIVE_SECS"),
            }
        }
        if let Ok(v) = env::var("ISY_EVENT_TOPIC") {
            if !v.is_empty() {
                cfg.event_prefix = v;
            }
        }
        if let Ok(v) = env::var("ISY_CONTROL_TOPIC") {
            if !v.is_empty() {
                cfg.control_prefix = v;
            }
        }

        cfg
    }
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let pid = std::process::id();
    format!("isybridge-{}-{}", host, pid)
}
