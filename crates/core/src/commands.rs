use std::fmt;

use crate::convert::to_device;
use crate::error::ValidationError;
use crate::topics::{escape_node, ControlTopic};

/// Command categories accepted on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandVerb {
    Poll,
    Status,
    Secmd,
    Climd,
    Clifs,
    Clisph,
    Clispc,
    Program,
    Dfof,
    Dfon,
    Brt,
    Dim,
    On,
    Off,
    Level,
}

const PROGRAM_ACTIONS: [&str; 8] = [
    "run",
    "runThen",
    "runElse",
    "stop",
    "enable",
    "disable",
    "enableRunAtStartup",
    "disableRunAtStartup",
];

impl CommandVerb {
    pub const ALL: [CommandVerb; 15] = [
        CommandVerb::Poll,
        CommandVerb::Status,
        CommandVerb::Secmd,
        CommandVerb::Climd,
        CommandVerb::Clifs,
        CommandVerb::Clisph,
        CommandVerb::Clispc,
        CommandVerb::Program,
        CommandVerb::Dfof,
        CommandVerb::Dfon,
        CommandVerb::Brt,
        CommandVerb::Dim,
        CommandVerb::On,
        CommandVerb::Off,
        CommandVerb::Level,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandVerb::Poll => "poll",
            CommandVerb::Status => "status",
            CommandVerb::Secmd => "secmd",
            CommandVerb::Climd => "climd",
            CommandVerb::Clifs => "clifs",
            CommandVerb::Clisph => "clisph",
            CommandVerb::Clispc => "clispc",
            CommandVerb::Program => "program",
            CommandVerb::Dfof => "dfof",
            CommandVerb::Dfon => "dfon",
            CommandVerb::Brt => "brt",
            CommandVerb::Dim => "dim",
            CommandVerb::On => "on",
            CommandVerb::Off => "off",
            CommandVerb::Level => "level",
        }
    }

    /// Exact (case-insensitive) verb names first; otherwise only on/off are
    /// recognized, by substring, with `off` taking precedence.
    pub fn recognize(token: &str) -> Option<Self> {
        let lower = token.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return None;
        }
        if let Some(verb) = Self::ALL.iter().find(|v| v.as_str() == lower) {
            return Some(*verb);
        }
        if lower.contains("off") {
            Some(CommandVerb::Off)
        } else if lower.contains("on") {
            Some(CommandVerb::On)
        } else {
            None
        }
    }
}

impl fmt::Display for CommandVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub node: String,
    pub verb: CommandVerb,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
        }
    }
}

/// A REST call against the controller's command endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub method: HttpMethod,
    pub path: String,
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.path)
    }
}

impl Command {
    /// Build a command from a control-channel message. The verb comes from the
    /// topic when present (payload is the action), otherwise from the payload
    /// as `verb,action` or as a dimmer-style shorthand (`ON`, `OFF`, `42`, ...).
    pub fn from_control(topic: ControlTopic, payload: &str) -> Result<Self, ValidationError> {
        let payload = payload.trim();
        let (token, action) = match topic.verb.as_deref() {
            Some(verb) => (verb.to_string(), non_empty(payload)),
            None => match payload.split_once(',') {
                Some((verb, action)) => (verb.trim().to_string(), non_empty(action)),
                None => shorthand(payload),
            },
        };
        let verb = CommandVerb::recognize(&token).ok_or(ValidationError::UnknownVerb(token))?;
        let node = topic.node.trim().to_string();
        if node.is_empty() {
            return Err(ValidationError::EmptyNode);
        }
        Ok(Self { node, verb, action })
    }

    /// Validate the action against the verb's grammar and render the request.
    pub fn translate(&self) -> Result<CommandRequest, ValidationError> {
        if self.node.trim().is_empty() {
            return Err(ValidationError::EmptyNode);
        }
        let node = escape_node(&self.node);
        let path = match self.verb {
            CommandVerb::Poll => format!("/rest/query/{node}"),
            CommandVerb::Status => format!("/rest/status/{node}"),
            CommandVerb::Secmd => {
                let action = self.one_of(&["0", "1"], "0 or 1")?;
                format!("/rest/nodes/{node}/SECMD/{action}")
            }
            CommandVerb::Climd => {
                let action = self.one_of(&["0", "1", "2", "3", "4", "5", "6", "7"], "0..7")?;
                format!("/rest/nodes/{node}/CLIMD/{action}")
            }
            CommandVerb::Clifs => {
                let action = self.one_of(&["0", "1"], "0 or 1")?;
                format!("/rest/nodes/{node}/CLIFS/{action}")
            }
            CommandVerb::Clisph => format!("/rest/nodes/{node}/CLISPH/{}", self.numeric()?),
            CommandVerb::Clispc => format!("/rest/nodes/{node}/CLISPC/{}", self.numeric()?),
            CommandVerb::Program => {
                let action = self.one_of(&PROGRAM_ACTIONS, "a program command")?;
                format!("/rest/programs/{node}/{action}")
            }
            CommandVerb::Dfof | CommandVerb::Dfon | CommandVerb::Brt | CommandVerb::Dim => {
                format!("/rest/nodes/{node}/cmd/{}", self.verb.as_str().to_ascii_uppercase())
            }
            CommandVerb::On => match self.on_level() {
                Some(level) => format!("/rest/nodes/{node}/cmd/DON/{}", to_device(level)?),
                None => format!("/rest/nodes/{node}/cmd/DON"),
            },
            CommandVerb::Off => format!("/rest/nodes/{node}/cmd/DOF"),
            CommandVerb::Level => {
                let action = self.required()?;
                let level = action.parse::<i64>().map_err(|_| self.invalid(action, "an integer 0..100"))?;
                format!("/rest/nodes/{node}/cmd/DON/{}", to_device(level)?)
            }
        };
        Ok(CommandRequest { method: HttpMethod::Get, path })
    }

    fn required(&self) -> Result<&str, ValidationError> {
        self.action
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(ValidationError::MissingAction { verb: self.verb.as_str() })
    }

    fn invalid(&self, action: &str, expected: &'static str) -> ValidationError {
        ValidationError::InvalidAction {
            verb: self.verb.as_str(),
            action: action.to_string(),
            expected,
        }
    }

    fn one_of(&self, allowed: &[&str], expected: &'static str) -> Result<&str, ValidationError> {
        let action = self.required()?;
        if allowed.contains(&action) {
            Ok(action)
        } else {
            Err(self.invalid(action, expected))
        }
    }

    fn numeric(&self) -> Result<&str, ValidationError> {
        let action = self.required()?;
        match action.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(action),
            _ => Err(self.invalid(action, "a number")),
        }
    }

    fn on_level(&self) -> Option<i64> {
        self.action
            .as_deref()
            .and_then(|a| a.trim().parse::<i64>().ok())
            .filter(|level| (1..=99).contains(level))
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

// Dimmer-style payloads: ON, OFF, INCREASE, DECREASE or a bare level
// (0 is off, 100 is full on).
fn shorthand(payload: &str) -> (String, Option<String>) {
    match payload.to_ascii_uppercase().as_str() {
        "ON" | "100" => ("on".into(), None),
        "OFF" | "0" => ("off".into(), None),
        "INCREASE" => ("brt".into(), None),
        "DECREASE" => ("dim".into(), None),
        _ => match payload.parse::<i64>() {
            Ok(level) if (1..=99).contains(&level) => ("on".into(), Some(level.to_string())),
            _ => (payload.to_string(), None),
        },
    }
}
