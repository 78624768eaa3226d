use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use isybridge_core::{DeviceRegistry, EventTranslator, FrameExtractor, DEFAULT_EVENT_PREFIX};
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

// Usage: isybridge-feed-smoke [ws://user:pass@host:port/rest/subscribe]
#[tokio::main]
async fn main() {
    let raw = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://admin:admin@127.0.0.1:80/rest/subscribe".to_string());
    let mut url = match Url::parse(&raw) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid feed URL {}: {}", raw, e);
            std::process::exit(1);
        }
    };
    let credentials = format!("{}:{}", url.username(), url.password().unwrap_or(""));
    let _ = url.set_username("");
    let _ = url.set_password(None);

    eprintln!("Connecting to {}", url);
    let mut request = url.as_str().into_client_request().expect("URL is a valid websocket request");
    let headers = request.headers_mut();
    let auth = format!("Basic {}", STANDARD.encode(credentials));
    headers.insert("Authorization", HeaderValue::from_str(&auth).expect("base64 is a valid header value"));
    headers.insert("Sec-WebSocket-Protocol", HeaderValue::from_static("ISYSUB"));
    headers.insert("Origin", HeaderValue::from_static("com.universal-devices.websockets.isy"));

    let (ws_stream, _) = match connect_async(request).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Feed connect failed: {}", e);
            std::process::exit(2);
        }
    };
    let (_write, mut read) = ws_stream.split();

    // Wait up to 30s for one controller event, print what would be published, then exit
    let translator = EventTranslator::new(DEFAULT_EVENT_PREFIX, Arc::new(DeviceRegistry::new()));
    let mut extractor = FrameExtractor::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let data = match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(t)))) => t.into_bytes(),
            Ok(Some(Ok(Message::Binary(b)))) => b,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                eprintln!("Feed receive error: {}", e);
                std::process::exit(3);
            }
            Ok(None) => {
                eprintln!("Feed closed by controller");
                std::process::exit(3);
            }
            Err(_) => {
                eprintln!("Timeout waiting for a controller event");
                std::process::exit(4);
            }
        };
        extractor.push(&data);
        while let Some(fragment) = extractor.next_fragment() {
            match translator.translate(&fragment) {
                Ok(intents) if !intents.is_empty() => {
                    for intent in intents {
                        println!("{} {}", intent.topic, intent.payload);
                    }
                    return;
                }
                Ok(_) => eprintln!("Skipping unpublished event: {}", fragment),
                Err(e) => eprintln!("Skipping fragment ({}): {}", e, fragment),
            }
        }
    }
}
