use anyhow::Context;
use dotenvy::dotenv;
use isybridge_mqtt::MqttService;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod bridge;
mod config;
mod error;
mod http;
mod isy;
mod metrics;

use bridge::BridgeController;
use config::{default_log_directive, env_flag, BridgeConfig};
use metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let config = BridgeConfig::from_env();
    info!(
        host = %config.isy.host,
        port = config.isy.port,
        feed = ?config.isy.feed,
        mqtt_host = %config.mqtt.host,
        mqtt_port = config.mqtt.port,
        verbose = config.isy.verbose,
        debug = config.isy.debug,
        "Starting ISY MQTT bridge"
    );

    let metrics = Metrics::new();
    let mqtt = MqttService::connect(config.mqtt.clone())
        .await
        .context("failed to initialize MQTT")?;
    let mut bridge = BridgeController::new(config.clone(), mqtt.clone(), metrics.clone())
        .context("failed to build controller HTTP client")?;
    let session = bridge.start().await;

    let http_shutdown = CancellationToken::new();
    let http_task = config.http_addr.map(|addr| {
        let state = http::AppState {
            mqtt: mqtt.clone(),
            registry: bridge.registry(),
            metrics: metrics.clone(),
            session: session.watch_state(),
        };
        tokio::spawn(http::serve(addr, state, http_shutdown.clone()))
    });

    shutdown_signal().await;
    info!("Caught interrupt signal");

    bridge.shutdown().await;
    http_shutdown.cancel();
    if let Some(task) = http_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "HTTP status server failed"),
            Err(e) => tracing::warn!(?e, "HTTP status server task failed"),
            Ok(Ok(())) => {}
        }
    }
    info!("Bridge stopped");
    Ok(())
}

fn init_tracing() {
    let verbose = env_flag("ISY_VERBOSE").unwrap_or(true);
    let debug = env_flag("ISY_DEBUG").unwrap_or(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_directive(verbose, debug)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install signal handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
