use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use isybridge_mqtt::MqttConfig;

/// How the controller's event feed is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Raw TCP socket with a SOAP subscribe handshake.
    Socket,
    /// WebSocket upgrade on `/rest/subscribe`.
    WebSocket,
}

impl FromStr for FeedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socket" | "tcp" | "soap" => Ok(FeedKind::Socket),
            "websocket" | "ws" => Ok(FeedKind::WebSocket),
            other => Err(format!("unknown feed kind '{other}' (expected socket or websocket)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsyConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: bool,
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    pub feed: FeedKind,
    pub verbose: bool,
    pub debug: bool,
}

impl Default for IsyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 80,
            username: "admin".to_string(),
            password: "admin".to_string(),
            tls: false,
            reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            feed: FeedKind::Socket,
            verbose: true,
            debug: false,
        }
    }
}

impl IsyConfig {
    pub fn from_env() -> Self {
        let mut cfg = IsyConfig::default();

        if let Ok(v) = env::var("ISY_HOST") {
            if !v.is_empty() {
                cfg.host = v;
            }
        }
        if let Ok(v) = env::var("ISY_PORT") {
            match v.parse::<u16>() {
                Ok(p) => cfg.port = p,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid ISY_PORT"),
            }
        }
        if let Ok(v) = env::var("ISY_USER") {
            if !v.is_empty() {
                cfg.username = v;
            }
        }
        if let Ok(v) = env::var("ISY_PASSWORD") {
            cfg.password = v;
        }
        if let Some(v) = env_flag("ISY_TLS") {
            cfg.tls = v;
        }
        if let Some(v) = env_flag("ISY_RECONNECT") {
            cfg.reconnect = v;
        }
        if let Ok(v) = env::var("ISY_RECONNECT_DELAY_SECS") {
            match v.parse::<u64>() {
                Ok(s) => cfg.reconnect_delay = Duration::from_secs(s),
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid ISY_RECONNECT_DELAY_SECS"),
            }
        }
        if let Ok(v) = env::var("ISY_FEED") {
            match v.parse::<FeedKind>() {
                Ok(kind) => cfg.feed = kind,
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid ISY_FEED"),
            }
        }
        if let Some(v) = env_flag("ISY_VERBOSE") {
            cfg.verbose = v;
        }
        if let Some(v) = env_flag("ISY_DEBUG") {
            cfg.debug = v;
        }

        cfg
    }

    /// Base URL of the controller's REST surface.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn feed_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}:{}/rest/subscribe", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub isy: IsyConfig,
    pub mqtt: MqttConfig,
    /// Status/metrics HTTP listener; disabled when unset.
    pub http_addr: Option<SocketAddr>,
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let http_addr = match env::var("ISYBRIDGE_HTTP_ADDR") {
            Ok(v) if !v.is_empty() => match v.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!(value = %v, "Ignoring invalid ISYBRIDGE_HTTP_ADDR");
                    None
                }
            },
            _ => None,
        };
        Self {
            isy: IsyConfig::from_env(),
            mqtt: MqttConfig::from_env(),
            http_addr,
        }
    }
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    let flag = parse_flag(&value);
    if flag.is_none() {
        tracing::warn!(name, value = %value, "Ignoring invalid boolean setting");
    }
    flag
}

/// Filter used when RUST_LOG is unset.
pub fn default_log_directive(verbose: bool, debug: bool) -> String {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    format!("{level},rumqttc=warn,hyper=info,reqwest=info")
}
