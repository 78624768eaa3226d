//! Controller-side plumbing: REST client, event feed transports and the
//! session that keeps the feed alive.

pub mod feed;
pub mod rest;
pub mod session;

pub use feed::{FeedConnector, SocketConnector, WebSocketConnector};
pub use rest::IsyRest;
pub use session::{ControllerSession, SessionHandle, SessionState};
