use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use isybridge_core::{DeviceMeta, DeviceRegistry};
use isybridge_mqtt::MqttService;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::isy::SessionState;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub mqtt: MqttService,
    pub registry: Arc<DeviceRegistry>,
    pub metrics: Arc<Metrics>,
    pub session: watch::Receiver<SessionState>,
}

#[derive(Serialize)]
struct DeviceEntry {
    address: String,
    #[serde(flatten)]
    meta: DeviceMeta,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .route("/api/devices", get(api_get_devices))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Starting HTTP status server");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    let mqtt_ok = state.mqtt.is_ready();
    let controller_ok = *state.session.borrow() == SessionState::Streaming;
    if mqtt_ok && controller_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok((content_type, body)) => ([(CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn api_get_devices(State(state): State<AppState>) -> Json<Vec<DeviceEntry>> {
    let snapshot = state.registry.snapshot();
    let mut devices: Vec<DeviceEntry> = snapshot
        .iter()
        .map(|(address, meta)| DeviceEntry { address: address.clone(), meta: meta.clone() })
        .collect();
    devices.sort_by(|a, b| a.address.cmp(&b.address));
    Json(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isybridge_mqtt::MqttConfig;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Accepts one client, acknowledges its CONNECT and keeps the socket open.
    async fn fake_broker() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = socket.read(&mut buf).await;
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn mqtt_on(port: u16) -> MqttService {
        let config = MqttConfig { host: "127.0.0.1".into(), port, ..MqttConfig::default() };
        MqttService::connect(config).await.unwrap()
    }

    async fn wait_ready(mqtt: &MqttService) {
        for _ in 0..100 {
            if mqtt.is_ready() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("MQTT client never connected");
    }

    async fn spawn_app(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn app_state(mqtt: MqttService, session: watch::Receiver<SessionState>) -> AppState {
        AppState { mqtt, registry: Arc::new(DeviceRegistry::new()), metrics: Metrics::new(), session }
    }

    async fn status_of(url: String) -> u16 {
        reqwest::get(url).await.unwrap().status().as_u16()
    }

    #[tokio::test]
    async fn ready_only_with_broker_connected_and_feed_streaming() {
        let mqtt = mqtt_on(fake_broker().await).await;
        wait_ready(&mqtt).await;
        let (session_tx, session_rx) = watch::channel(SessionState::Streaming);
        let base = spawn_app(app_state(mqtt, session_rx)).await;

        assert_eq!(status_of(format!("{base}/readyz")).await, 200);
        session_tx.send_replace(SessionState::Disconnected);
        assert_eq!(status_of(format!("{base}/readyz")).await, 503);
    }

    #[tokio::test]
    async fn not_ready_without_broker() {
        let mqtt = mqtt_on(closed_port().await).await;
        let (_session_tx, session_rx) = watch::channel(SessionState::Streaming);
        let base = spawn_app(app_state(mqtt, session_rx)).await;

        assert_eq!(status_of(format!("{base}/readyz")).await, 503);
        let health = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(health.status().as_u16(), 200);
        assert_eq!(health.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn devices_and_metrics_reflect_current_state() {
        let mqtt = mqtt_on(closed_port().await).await;
        let (_session_tx, session_rx) = watch::channel(SessionState::Disconnected);
        let state = app_state(mqtt, session_rx);
        let mut devices = HashMap::new();
        devices.insert(
            "2F 1 9 2".to_string(),
            DeviceMeta { name: "Bedroom Fan".into(), parent: "2F 1 9 1".into(), category: 1, sub_category: 46 },
        );
        devices.insert(
            "1E 4 58 1".to_string(),
            DeviceMeta { name: "Kitchen Lights".into(), parent: "12345".into(), category: 1, sub_category: 32 },
        );
        state.registry.replace(devices);
        state.metrics.commands_sent.inc();
        let base = spawn_app(state).await;

        let body = reqwest::get(format!("{base}/api/devices")).await.unwrap().text().await.unwrap();
        let listed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            listed,
            serde_json::json!([
                {"address": "1E 4 58 1", "name": "Kitchen Lights", "parent": "12345", "category": 1, "subcategory": 32},
                {"address": "2F 1 9 2", "name": "Bedroom Fan", "parent": "2F 1 9 1", "category": 1, "subcategory": 46}
            ])
        );

        let response = reqwest::get(format!("{base}/metrics")).await.unwrap();
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));
        let text = response.text().await.unwrap();
        assert!(text.contains("isybridge_commands_sent_total 1"));
        assert!(text.contains("isybridge_mqtt_connected 0"));
    }
}
