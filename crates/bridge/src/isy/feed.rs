//! Transports for the controller's event feed.
//!
//! Both variants hand the session raw chunks; segmentation into event
//! fragments happens downstream, so the socket's HTTP framing and the
//! websocket's message framing look the same to the rest of the bridge.

use std::future::Future;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::IsyConfig;
use crate::error::TransportError;

const READ_BUFFER: usize = 8 * 1024;
const WS_SUBPROTOCOL: &str = "ISYSUB";
const WS_ORIGIN: &str = "com.universal-devices.websockets.isy";
const SUBSCRIBE_ACTION: &str = "urn:udi-com:service:X_Insteon_Lighting_Service:1#Subscribe";

/// Opens a fresh feed connection. Each call yields an independent stream.
pub trait FeedConnector: Send + Sync + 'static {
    type Stream: FeedStream;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;
}

pub trait FeedStream: Send {
    /// Request the event subscription on a freshly opened stream.
    fn subscribe(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next chunk of feed data; `Ok(None)` once the controller closed the
    /// connection in an orderly way.
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

// ----- Raw socket feed -----

#[derive(Debug, Clone)]
pub struct SocketConnector {
    host: String,
    port: u16,
    authorization: String,
}

impl SocketConnector {
    pub fn new(config: &IsyConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            authorization: basic_auth(&config.username, &config.password),
        }
    }
}

impl FeedConnector for SocketConnector {
    type Stream = SocketFeed;

    async fn connect(&self) -> Result<SocketFeed, TransportError> {
        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!(%addr, "Connecting to controller event socket");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransportError::Connect { addr: addr.clone(), source })?;
        Ok(SocketFeed { stream, host: addr, authorization: self.authorization.clone() })
    }
}

pub struct SocketFeed {
    stream: TcpStream,
    host: String,
    authorization: String,
}

/// The SOAP subscribe request; the controller answers and then keeps
/// posting events over the same socket.
pub fn subscribe_request(host: &str, authorization: &str) -> String {
    let body = concat!(
        "<s:Envelope><s:Body>",
        "<u:Subscribe xmlns:u=\"urn:udicom:service:X_Insteon_Lighting_Service:1\">",
        "<reportURL>REUSE_SOCKET</reportURL><duration>infinite</duration></u:Subscribe>",
        "</s:Body></s:Envelope>",
    );
    format!(
        "POST /services HTTP/1.1\r\n\
         Host: {host}\r\n\
         Authorization: {authorization}\r\n\
         SOAPACTION: {SUBSCRIBE_ACTION}\r\n\
         Content-Length: {}\r\n\
         Content-Type: text/xml; charset=\"utf-8\"\r\n\r\n\
         {body}\r\n",
        body.len()
    )
}

impl FeedStream for SocketFeed {
    async fn subscribe(&mut self) -> Result<(), TransportError> {
        let request = subscribe_request(&self.host, &self.authorization);
        self.stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        self.stream.flush().await.map_err(|e| TransportError::Subscribe(e.to_string()))?;
        tracing::info!("Subscribed to controller events");
        Ok(())
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = vec![0u8; READ_BUFFER];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

// ----- WebSocket feed -----

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    authorization: String,
}

impl WebSocketConnector {
    pub fn new(config: &IsyConfig) -> Self {
        Self {
            url: config.feed_url(),
            authorization: basic_auth(&config.username, &config.password),
        }
    }
}

impl FeedConnector for WebSocketConnector {
    type Stream = WebSocketFeed;

    async fn connect(&self) -> Result<WebSocketFeed, TransportError> {
        tracing::info!(url = %self.url, "Connecting to controller event websocket");
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        let authorization = HeaderValue::from_str(&self.authorization)
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        headers.insert("Authorization", authorization);
        headers.insert("Sec-WebSocket-Protocol", HeaderValue::from_static(WS_SUBPROTOCOL));
        headers.insert("Origin", HeaderValue::from_static(WS_ORIGIN));

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(WebSocketFeed { stream })
    }
}

pub struct WebSocketFeed {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FeedStream for WebSocketFeed {
    // The upgrade request already subscribed us.
    async fn subscribe(&mut self) -> Result<(), TransportError> {
        tracing::info!("Subscribed to controller events");
        Ok(())
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Controller closed the event websocket");
                    return Ok(None);
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
