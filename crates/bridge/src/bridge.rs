//! Wiring between the controller session, the translators and the bus.
//!
//! Two independent pipelines, each with a single consumer so ordering within
//! a pipeline is preserved:
//! controller feed -> fragments queue -> event translator -> MQTT publish,
//! MQTT control messages -> command queue -> command translator -> per-node
//! request queue -> REST call.

use std::collections::HashMap;
use std::sync::Arc;

use isybridge_core::{
    control_wildcard, normalize_node, parse_control_topic, Command, CommandRequest, DeviceRegistry,
    EventTranslator, ParseError, ValidationError,
};
use isybridge_mqtt::{MqttEvent, MqttService, QoS};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, FeedKind, IsyConfig};
use crate::isy::{ControllerSession, FeedConnector, IsyRest, SessionHandle, SocketConnector, WebSocketConnector};
use crate::metrics::Metrics;

const FRAGMENT_QUEUE: usize = 256;
const COMMAND_QUEUE: usize = 64;

pub struct BridgeController {
    config: BridgeConfig,
    mqtt: MqttService,
    rest: IsyRest,
    registry: Arc<DeviceRegistry>,
    metrics: Arc<Metrics>,
    session: Option<(SessionHandle, JoinHandle<()>)>,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeController {
    pub fn new(config: BridgeConfig, mqtt: MqttService, metrics: Arc<Metrics>) -> Result<Self, reqwest::Error> {
        let rest = IsyRest::new(&config.isy)?;
        Ok(Self {
            config,
            mqtt,
            rest,
            registry: Arc::new(DeviceRegistry::new()),
            metrics,
            session: None,
            tasks: Vec::new(),
        })
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// Load device metadata, subscribe to the control channel and start both
    /// pipelines and the controller session.
    pub async fn start(&mut self) -> SessionHandle {
        // Receiver first, so a ConnAck or retained control message that
        // arrives while the listing loads is not lost.
        let bus_events = self.mqtt.events();
        let control_prefix = self.config.mqtt.control_prefix.clone();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        self.tasks.push(tokio::spawn(consume_bus(
            bus_events,
            self.mqtt.is_ready(),
            control_prefix.clone(),
            command_tx,
            self.metrics.clone(),
        )));
        self.tasks.push(tokio::spawn(dispatch_commands(command_rx, self.rest.clone(), self.metrics.clone())));

        if let Err(e) = self.rest.load_devices(&self.registry).await {
            warn!(error = %e, known = self.registry.len(), "Could not load device information; continuing");
        }

        let wildcard = control_wildcard(&control_prefix);
        if let Err(e) = self.mqtt.subscribe(&wildcard, QoS::AtMostOnce).await {
            warn!(?e, topic = %wildcard, "Failed to subscribe to control topics");
        }

        let (fragment_tx, fragment_rx) = mpsc::channel(FRAGMENT_QUEUE);
        let translator = EventTranslator::new(self.config.mqtt.event_prefix.clone(), self.registry.clone());
        self.tasks.push(tokio::spawn(publish_events(
            fragment_rx,
            translator,
            self.mqtt.clone(),
            self.metrics.clone(),
        )));

        let isy = &self.config.isy;
        let (handle, task) = match isy.feed {
            FeedKind::Socket => spawn_session(SocketConnector::new(isy), fragment_tx, isy, self.metrics.clone()),
            FeedKind::WebSocket => spawn_session(WebSocketConnector::new(isy), fragment_tx, isy, self.metrics.clone()),
        };
        self.session = Some((handle.clone(), task));
        handle
    }

    /// Stop reconnecting, close the controller session, then the bus client.
    pub async fn shutdown(mut self) {
        if let Some((handle, task)) = self.session.take() {
            info!("Disconnecting from controller");
            handle.shutdown();
            if let Err(e) = task.await {
                warn!(?e, "Controller session task failed");
            }
            info!(state = %handle.state(), "Controller session ended");
        }
        info!("Disconnecting from MQTT broker");
        if let Err(e) = self.mqtt.disconnect().await {
            warn!(?e, "MQTT disconnect failed");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

fn spawn_session<C: FeedConnector>(
    connector: C,
    fragments: mpsc::Sender<String>,
    isy: &IsyConfig,
    metrics: Arc<Metrics>,
) -> (SessionHandle, JoinHandle<()>) {
    let (session, handle) = ControllerSession::new(connector, fragments, isy.reconnect, isy.reconnect_delay, metrics);
    (handle, tokio::spawn(session.run()))
}

async fn publish_events(
    mut fragments: mpsc::Receiver<String>,
    translator: EventTranslator,
    mqtt: MqttService,
    metrics: Arc<Metrics>,
) {
    while let Some(fragment) = fragments.recv().await {
        let intents = match translator.translate(&fragment) {
            Ok(intents) => intents,
            Err(e) => {
                metrics.events_dropped.inc();
                match e {
                    // subscription replies and heartbeats land here
                    ParseError::MissingEvent | ParseError::MissingNode => debug!(error = %e, "Dropping fragment"),
                    _ => warn!(error = %e, %fragment, "Dropping malformed event fragment"),
                }
                continue;
            }
        };
        for intent in intents {
            debug!(topic = %intent.topic, payload = %intent.payload, "Publishing event");
            match mqtt.publish(&intent.topic, QoS::AtMostOnce, false, intent.payload.into_bytes()).await {
                Ok(()) => metrics.events_published.inc(),
                Err(e) => {
                    metrics.events_dropped.inc();
                    warn!(?e, topic = %intent.topic, "MQTT publish failed");
                }
            }
        }
    }
    debug!("Event publisher stopped");
}

/// `None` for messages outside the control namespace.
pub fn control_command(prefix: &str, topic: &str, payload: &[u8]) -> Option<Result<Command, ValidationError>> {
    let control = parse_control_topic(prefix, topic)?;
    Some(Command::from_control(control, &String::from_utf8_lossy(payload)))
}

async fn consume_bus(
    mut events: broadcast::Receiver<MqttEvent>,
    connected: bool,
    control_prefix: String,
    commands: mpsc::Sender<Command>,
    metrics: Arc<Metrics>,
) {
    metrics.mqtt_connected.set(connected as i64);
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Control message consumer lagged; messages lost");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            MqttEvent::Connected => metrics.mqtt_connected.set(1),
            MqttEvent::Disconnected => metrics.mqtt_connected.set(0),
            MqttEvent::Publish { topic, payload } => {
                debug!(%topic, payload = %String::from_utf8_lossy(&payload), "Incoming message");
                match control_command(&control_prefix, &topic, &payload) {
                    None => {}
                    Some(Ok(command)) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        metrics.commands_rejected.inc();
                        warn!(%topic, error = %e, "Rejected control message");
                    }
                }
            }
        }
    }
    debug!("Control message consumer stopped");
}

async fn dispatch_commands(mut commands: mpsc::Receiver<Command>, rest: IsyRest, metrics: Arc<Metrics>) {
    // One ordered queue per node; different nodes proceed concurrently.
    let mut queues: HashMap<String, mpsc::UnboundedSender<CommandRequest>> = HashMap::new();
    while let Some(command) = commands.recv().await {
        let request = match command.translate() {
            Ok(request) => request,
            Err(e) => {
                metrics.commands_rejected.inc();
                warn!(node = %command.node, verb = %command.verb, action = ?command.action, error = %e, "Rejected command");
                continue;
            }
        };
        info!(node = %command.node, verb = %command.verb, path = %request.path, "Sending command to controller");
        metrics.commands_sent.inc();
        let queue = queues
            .entry(normalize_node(&command.node))
            .or_insert_with_key(|node| node_queue(node.clone(), rest.clone()));
        if let Err(e) = queue.send(request) {
            warn!(node = %command.node, path = %e.0.path, "Command queue closed; dropping command");
        }
    }
    debug!("Command dispatcher stopped");
}

fn node_queue(node: String, rest: IsyRest) -> mpsc::UnboundedSender<CommandRequest> {
    let (tx, mut rx) = mpsc::unbounded_channel::<CommandRequest>();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            if let Err(e) = rest.send_command(&request).await {
                warn!(%node, error = %e, path = %request.path, "Controller command request failed");
            }
        }
        debug!(%node, "Command queue stopped");
    });
    tx
}
