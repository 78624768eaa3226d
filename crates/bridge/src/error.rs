use isybridge_core::ListingError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of the controller event feed. All of them end the current
/// connection and leave recovery to the session's reconnect policy.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("controller connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("controller websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("event subscription failed: {0}")]
    Subscribe(String),
}

/// Failures loading the controller's device listing.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("device listing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("device listing returned HTTP {0}")]
    Status(u16),
    #[error(transparent)]
    Listing(#[from] ListingError),
}
