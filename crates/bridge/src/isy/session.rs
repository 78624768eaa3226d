//! Keeps exactly one controller event feed alive.
//!
//! `Disconnected -> Connecting -> Subscribing -> Streaming`, back to
//! `Disconnected` on any transport error or close, then `Connecting` again
//! after a fixed delay while the reconnect flag is set. `Closed` is terminal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use isybridge_core::FrameExtractor;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::feed::{FeedConnector, FeedStream};
use crate::error::TransportError;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Subscribing => "subscribing",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Control side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    state_rx: watch::Receiver<SessionState>,
    reconnect: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn set_reconnect(&self, enabled: bool) {
        self.reconnect.store(enabled, Ordering::SeqCst);
    }

    /// Clear the reconnect flag, then close the feed and cancel any pending
    /// reconnect.
    pub fn shutdown(&self) {
        self.set_reconnect(false);
        self.cancel.cancel();
    }
}

pub struct ControllerSession<C: FeedConnector> {
    connector: C,
    fragments: mpsc::Sender<String>,
    reconnect: Arc<AtomicBool>,
    delay: Duration,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    metrics: Arc<Metrics>,
}

enum Ended {
    Closed,
    Failed(TransportError),
    Cancelled,
    ConsumerGone,
}

impl<C: FeedConnector> ControllerSession<C> {
    pub fn new(
        connector: C,
        fragments: mpsc::Sender<String>,
        reconnect: bool,
        delay: Duration,
        metrics: Arc<Metrics>,
    ) -> (Self, SessionHandle) {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let reconnect = Arc::new(AtomicBool::new(reconnect));
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            state_rx,
            reconnect: reconnect.clone(),
            cancel: cancel.clone(),
        };
        let session = Self { connector, fragments, reconnect, delay, cancel, state_tx, metrics };
        (session, handle)
    }

    fn set_state(&self, state: SessionState) {
        debug!(%state, "Controller session state");
        self.metrics.controller_streaming.set((state == SessionState::Streaming) as i64);
        self.state_tx.send_replace(state);
    }

    pub async fn run(self) {
        let mut attempt: u64 = 0;
        loop {
            if attempt > 0 {
                self.metrics.controller_reconnects.inc();
            }
            attempt += 1;

            let ended = self.connect_and_stream().await;
            self.set_state(SessionState::Disconnected);
            match ended {
                Ended::Cancelled => break,
                Ended::ConsumerGone => {
                    info!("Event consumer stopped; closing controller session");
                    break;
                }
                Ended::Closed => info!("Disconnected from controller"),
                Ended::Failed(e) => warn!(error = %e, attempt, "Controller event feed failed"),
            }

            if !self.reconnect.load(Ordering::SeqCst) {
                info!("Reconnect disabled; controller session stopping");
                break;
            }
            info!(delay_secs = self.delay.as_secs_f64(), "Reconnecting to controller after delay");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.delay) => {}
            }
        }
        self.set_state(SessionState::Closed);
    }

    // One connection lifetime. The stream is dropped on return, so a
    // reconnect always starts from a fresh transport.
    async fn connect_and_stream(&self) -> Ended {
        self.set_state(SessionState::Connecting);
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ended::Cancelled,
            connected = self.connector.connect() => connected,
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => return Ended::Failed(e),
        };
        info!("Connected to controller");

        self.set_state(SessionState::Subscribing);
        let subscribed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                stream.close().await;
                return Ended::Cancelled;
            }
            subscribed = stream.subscribe() => subscribed,
        };
        if let Err(e) = subscribed {
            stream.close().await;
            return Ended::Failed(e);
        }

        self.set_state(SessionState::Streaming);
        let mut extractor = FrameExtractor::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stream.close().await;
                    return Ended::Cancelled;
                }
                chunk = stream.next_chunk() => chunk,
            };
            let chunk = match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return Ended::Closed,
                Err(e) => return Ended::Failed(e),
            };
            debug!(data = %String::from_utf8_lossy(&chunk), "Incoming controller data");

            extractor.push(&chunk);
            while let Some(fragment) = extractor.next_fragment() {
                debug!(%fragment, "Extracted event fragment");
                if self.fragments.send(fragment).await.is_err() {
                    stream.close().await;
                    return Ended::ConsumerGone;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::pending;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const DELAY: Duration = Duration::from_secs(5);
    const EVENT: &str = r#"<?xml version="1.0"?><Event><control>ST</control><action>0</action><node>1E 4 58 1</node></Event>"#;

    enum Script {
        Refuse,
        Chunks(Vec<&'static [u8]>),
        Hang,
    }

    #[derive(Clone)]
    struct MockConnector {
        opens: Arc<AtomicUsize>,
        scripts: Arc<Mutex<VecDeque<Script>>>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Script>) -> Self {
            Self { opens: Arc::default(), scripts: Arc::new(Mutex::new(scripts.into())) }
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    struct MockStream {
        chunks: VecDeque<Vec<u8>>,
        hang: bool,
    }

    impl FeedConnector for MockConnector {
        type Stream = MockStream;

        async fn connect(&self) -> Result<MockStream, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Hang);
            match script {
                Script::Refuse => Err(TransportError::Io(std::io::ErrorKind::ConnectionRefused.into())),
                Script::Chunks(chunks) => Ok(MockStream {
                    chunks: chunks.into_iter().map(<[u8]>::to_vec).collect(),
                    hang: false,
                }),
                Script::Hang => Ok(MockStream { chunks: VecDeque::new(), hang: true }),
            }
        }
    }

    impl FeedStream for MockStream {
        async fn subscribe(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            if let Some(chunk) = self.chunks.pop_front() {
                return Ok(Some(chunk));
            }
            if self.hang {
                pending::<()>().await;
            }
            Ok(None)
        }

        async fn close(&mut self) {}
    }

    fn start(
        connector: &MockConnector,
        reconnect: bool,
    ) -> (SessionHandle, mpsc::Receiver<String>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let (session, handle) = ControllerSession::new(connector.clone(), tx, reconnect, DELAY, Metrics::new());
        let task = tokio::spawn(session.run());
        (handle, rx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn close_with_reconnect_set_reconnects_once_after_delay() {
        let connector = MockConnector::new(vec![Script::Chunks(vec![EVENT.as_bytes()]), Script::Hang]);
        let (handle, mut rx, task) = start(&connector, true);

        assert_eq!(rx.recv().await.as_deref(), Some(EVENT));
        sleep(Duration::from_millis(4900)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(handle.state(), SessionState::Disconnected);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.opens(), 2);
        assert_eq!(handle.state(), SessionState::Streaming);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opens(), 2);

        handle.shutdown();
        task.await.unwrap();
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_with_reconnect_cleared_does_not_reconnect() {
        let connector = MockConnector::new(vec![Script::Chunks(vec![EVENT.as_bytes()])]);
        let (handle, mut rx, task) = start(&connector, true);
        handle.set_reconnect(false);

        assert_eq!(rx.recv().await.as_deref(), Some(EVENT));
        task.await.unwrap();
        sleep(DELAY * 3).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reconnect() {
        let connector = MockConnector::new(vec![Script::Chunks(vec![])]);
        let (handle, _rx, task) = start(&connector, true);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.state(), SessionState::Disconnected);
        handle.shutdown();
        task.await.unwrap();

        sleep(DELAY * 2).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_is_retried() {
        let connector = MockConnector::new(vec![Script::Refuse, Script::Hang]);
        let (handle, _rx, task) = start(&connector, true);

        sleep(DELAY + Duration::from_millis(100)).await;
        assert_eq!(connector.opens(), 2);
        assert_eq!(handle.state(), SessionState::Streaming);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_split_across_reads_are_reassembled() {
        let (head, tail) = EVENT.as_bytes().split_at(30);
        let second: &'static [u8] = b"POST reuse_socket HTTP/1.1\r\n\r\n<?xml version=\"1.0\"?><Event><control>DON</control><node>1</node></Event>";
        let connector = MockConnector::new(vec![Script::Chunks(vec![&b"HTTP/1.1 200 OK\r\n\r\n"[..], head, tail, second])]);
        let (handle, mut rx, task) = start(&connector, false);

        assert_eq!(rx.recv().await.as_deref(), Some(EVENT));
        assert!(rx.recv().await.unwrap().contains("<control>DON</control>"));
        task.await.unwrap();
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_consumer_ends_session() {
        let connector = MockConnector::new(vec![Script::Chunks(vec![EVENT.as_bytes()]), Script::Hang]);
        let (handle, rx, task) = start(&connector, true);
        drop(rx);

        task.await.unwrap();
        assert_eq!(connector.opens(), 1);
        assert_eq!(handle.state(), SessionState::Closed);
    }
}
