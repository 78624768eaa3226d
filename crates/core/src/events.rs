use std::sync::Arc;

use crate::convert::fan_speed;
use crate::devices::DeviceRegistry;
use crate::error::ParseError;
use crate::topics::{event_topic, normalize_node};

/// Kinds of state change the bridge republishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    St,
    Don,
    Dof,
    Dfon,
    Dfof,
    Brt,
    Dim,
    Clisph,
    Clispc,
    Clifs,
    Climd,
    Clihcs,
    Clihum,
}

impl ControlCode {
    pub fn parse(code: &str) -> Option<Self> {
        let code = match code {
            "ST" => ControlCode::St,
            "DON" => ControlCode::Don,
            "DOF" => ControlCode::Dof,
            "DFON" => ControlCode::Dfon,
            "DFOF" => ControlCode::Dfof,
            "BRT" => ControlCode::Brt,
            "DIM" => ControlCode::Dim,
            "CLISPH" => ControlCode::Clisph,
            "CLISPC" => ControlCode::Clispc,
            "CLIFS" => ControlCode::Clifs,
            "CLIMD" => ControlCode::Climd,
            "CLIHCS" => ControlCode::Clihcs,
            "CLIHUM" => ControlCode::Clihum,
            _ => return None,
        };
        Some(code)
    }

    /// Last topic segment for this code.
    pub fn suffix(self) -> &'static str {
        match self {
            ControlCode::St => "st",
            ControlCode::Don => "don",
            ControlCode::Dof => "dof",
            ControlCode::Dfon => "dfon",
            ControlCode::Dfof => "dfof",
            ControlCode::Brt => "brt",
            ControlCode::Dim => "dim",
            ControlCode::Clisph => "clisph",
            ControlCode::Clispc => "clispc",
            ControlCode::Clifs => "clifs",
            ControlCode::Climd => "climd",
            ControlCode::Clihcs => "clihcs",
            ControlCode::Clihum => "clihum",
        }
    }
}

/// One event as reported by the controller. `control` is kept raw so that
/// codes the bridge does not republish can still be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub node: String,
    pub control: String,
    pub action: String,
}

impl Event {
    pub fn parse(fragment: &str) -> Result<Self, ParseError> {
        let doc = roxmltree::Document::parse(fragment).map_err(|e| ParseError::Xml(e.to_string()))?;
        let event = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "Event")
            .ok_or(ParseError::MissingEvent)?;

        let child_text = |name: &str| {
            event
                .children()
                .find(|c| c.is_element() && c.tag_name().name() == name)
                .and_then(|c| c.text())
                .map(|t| t.trim().to_string())
                .unwrap_or_default()
        };

        let node = child_text("node");
        if node.is_empty() {
            return Err(ParseError::MissingNode);
        }
        let control = child_text("control");
        if control.is_empty() {
            return Err(ParseError::MissingControl);
        }
        Ok(Self { node, control, action: child_text("action") })
    }

    pub fn code(&self) -> Option<ControlCode> {
        ControlCode::parse(&self.control)
    }
}

/// A message to put on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishIntent {
    pub topic: String,
    pub payload: String,
}

/// Turns event fragments into publish intents under the event prefix.
#[derive(Clone)]
pub struct EventTranslator {
    prefix: String,
    registry: Arc<DeviceRegistry>,
}

impl EventTranslator {
    pub fn new(prefix: impl Into<String>, registry: Arc<DeviceRegistry>) -> Self {
        Self { prefix: prefix.into(), registry }
    }

    /// `Ok(vec![])` means the event was understood but is not republished.
    pub fn translate(&self, fragment: &str) -> Result<Vec<PublishIntent>, ParseError> {
        let event = Event::parse(fragment)?;
        Ok(self.intents(&event))
    }

    pub fn intents(&self, event: &Event) -> Vec<PublishIntent> {
        let node = normalize_node(&event.node);
        let meta = self.registry.lookup(&event.node);
        let name = meta.as_ref().map(|m| m.name.as_str()).unwrap_or("unknown");

        let Some(code) = event.code() else {
            tracing::debug!(node = %node, device = name, control = %event.control, "ignoring unhandled control code");
            return Vec::new();
        };
        tracing::info!(node = %node, device = name, control = %event.control, action = %event.action, "controller event");

        let mut out = vec![PublishIntent {
            topic: event_topic(&self.prefix, &node, code.suffix()),
            payload: event.action.clone(),
        }];

        if code == ControlCode::St && meta.as_ref().is_some_and(|m| m.is_fan_motor(&event.node)) {
            match event.action.parse::<i64>().map_err(|_| ()).and_then(|v| fan_speed(v).map_err(|_| ())) {
                Ok(speed) => out.push(PublishIntent {
                    topic: event_topic(&self.prefix, &node, "fan"),
                    payload: speed.to_string(),
                }),
                Err(()) => tracing::debug!(node = %node, action = %event.action, "fan status is not a device level"),
            }
        }
        out
    }
}
