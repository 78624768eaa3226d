use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use std::time::Duration;
use std::collections::HashMap;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::sync::{broadcast, RwLock, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    Publish { topic: String, payload: Vec<u8> },
}

#[derive(Clone)]
pub struct MqttService {
    client: Arc<Mutex<AsyncClient>>,
    ready: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MqttService {
    pub async fn connect(config: MqttConfig) -> Result<Self, ClientError> {
        let (client, eventloop) = build_client(&config)?;
        let ready = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let subscriptions = Arc::new(RwLock::new(HashMap::new()));

        let client_shared = Arc::new(Mutex::new(client));
        let loop_handle = tokio::spawn(run_eventloop(
            eventloop,
            client_shared.clone(),
            ready.clone(),
            closing.clone(),
            tx.clone(),
            subscriptions.clone(),
            config,
        ));

        Ok(Self {
            client: client_shared,
            ready,
            closing,
            events_tx: tx,
            subscriptions,
            loop_handle: Arc::new(Mutex::new(Some(loop_handle))),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Every receiver sees every event; slow receivers get `Lagged`.
    pub fn events(&self) -> broadcast::Receiver<MqttEvent> {
        self.events_tx.subscribe()
    }

    pub async fn publish<T: Into<Vec<u8>>>(&self, topic: &str, qos: QoS, retain: bool, payload: T) -> Result<(), ClientError> {
        let client = self.client.lock().await;
        client.publish(topic, qos, retain, payload).await
    }

    /// Subscriptions are remembered and restored after every reconnect.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ClientError> {
        let client = self.client.lock().await;
        let result = client.subscribe(topic, qos).await;
        if result.is_ok() {
            let mut subs = self.subscriptions.write().await;
            subs.insert(topic.to_string(), qos);
        }
        result
    }

    /// Close the broker connection and stop the event loop for good.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.closing.store(true, Ordering::Relaxed);
        self.ready.store(false, Ordering::Relaxed);
        let result = {
            let client = self.client.lock().await;
            client.disconnect().await
        };

        if let Some(mut handle) = self.loop_handle.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("MQTT event loop did not stop in time; aborting");
                handle.abort();
            }
        }
        result
    }
}

fn build_client(config: &MqttConfig) -> Result<(AsyncClient, EventLoop), ClientError> {
    let mut opts = MqttOptions::new(&config.client_id, &config.host, config.port);
    opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
    opts.set_clean_session(config.clean_session);
    if let (Some(u), Some(p)) = (&config.username, &config.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    opts.set_request_channel_capacity(64);
    Ok(AsyncClient::new(opts, 64))
}

async fn run_eventloop(
    mut eventloop: EventLoop,
    client_shared: Arc<Mutex<AsyncClient>>,
    ready: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    config: MqttConfig,
) {
    let mut backoff_secs = 1u64;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!(host = %config.host, port = config.port, "MQTT connected");
                ready.store(true, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Connected);

                let subs = subscriptions.read().await;
                let client = client_shared.lock().await;
                for (topic, qos) in subs.iter() {
                    debug!("Restoring subscription to {}", topic);
                    if let Err(err) = client.subscribe(topic, *qos).await {
                        warn!(?err, "Failed to restore subscription to {}", topic);
                    }
                }
                drop(client);
                drop(subs);

                backoff_secs = 1;
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let topic = p.topic.to_string();
                let payload = p.payload.to_vec();
                let _ = events_tx.send(MqttEvent::Publish { topic, payload });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT disconnect sent");
                ready.store(false, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Disconnected);
                if closing.load(Ordering::Relaxed) {
                    break;
                }
            }
            Ok(other) => {
                debug!(?other, "MQTT event");
            }
            Err(e) => {
                ready.store(false, Ordering::Relaxed);
                let _ = events_tx.send(MqttEvent::Disconnected);
                if closing.load(Ordering::Relaxed) {
                    debug!(error = ?e, "MQTT connection closed during shutdown");
                    break;
                }
                error!(error = ?e, "MQTT error; will attempt reconnect");

                let wait = backoff_secs.min(30);
                sleep(Duration::from_secs(wait)).await;
                backoff_secs = (backoff_secs * 2).min(60);

                match build_client(&config) {
                    Ok((new_client, new_eventloop)) => {
                        eventloop = new_eventloop;
                        {
                            let mut client_guard = client_shared.lock().await;
                            *client_guard = new_client;
                        }
                        info!("MQTT client and eventloop rebuilt, attempting reconnection");
                        continue;
                    }
                    Err(err) => {
                        error!(?err, "Failed to rebuild MQTT client; retrying");
                    }
                }
            }
        }
    }
    debug!("MQTT event loop stopped");
}
