use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub events_published: IntCounter,
    pub events_dropped: IntCounter,
    pub commands_sent: IntCounter,
    pub commands_rejected: IntCounter,
    pub controller_reconnects: IntCounter,
    pub mqtt_connected: IntGauge,
    pub controller_streaming: IntGauge,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            let c = IntCounter::new(name, help).expect("valid counter definition");
            let _ = registry.register(Box::new(c.clone()));
            c
        };
        let gauge = |name: &str, help: &str| {
            let g = IntGauge::new(name, help).expect("valid gauge definition");
            let _ = registry.register(Box::new(g.clone()));
            g
        };

        let events_published = counter("isybridge_events_published_total", "Controller events published to MQTT");
        let events_dropped = counter("isybridge_events_dropped_total", "Event fragments dropped as malformed or unpublishable");
        let commands_sent = counter("isybridge_commands_sent_total", "Commands issued to the controller");
        let commands_rejected = counter("isybridge_commands_rejected_total", "Control messages rejected by validation");
        let controller_reconnects = counter("isybridge_controller_reconnects_total", "Controller event feed reconnect attempts");
        let mqtt_connected = gauge("isybridge_mqtt_connected", "MQTT connection status (1 connected, 0 otherwise)");
        let controller_streaming = gauge("isybridge_controller_streaming", "Controller event feed status (1 streaming, 0 otherwise)");

        Arc::new(Self {
            registry,
            events_published,
            events_dropped,
            commands_sent,
            commands_rejected,
            controller_reconnects,
            mqtt_connected,
            controller_streaming,
        })
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> Result<(String, Vec<u8>), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok((encoder.format_type().to_string(), buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_metrics() {
        let metrics = Metrics::new();
        metrics.commands_sent.inc();
        let (content_type, body) = metrics.render().unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("isybridge_commands_sent_total 1"));
        assert!(body.contains("isybridge_controller_streaming 0"));
    }
}
