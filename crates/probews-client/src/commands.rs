//! Correlated request/reply over a single command socket.
//!
//! [`CommandClient`] multiplexes concurrently pending commands over one
//! WebSocket: each command carries a fresh correlation nonce, the reader
//! task routes replies back to the waiting caller by that nonce, and
//! everything without a nonce is dispatched as a named event. Socket
//! lifecycle itself is surfaced through the synthetic `close` and `error`
//! events, so consumers observe it the same way as server pushes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use probews_protocol::{CommandRequest, ServerFrame};

use crate::error::{ClientError, ClientResult};
use crate::status::{ConnectionStatus, StatusHandle};

/// Synthetic event fired when the socket closes cleanly.
pub const EVENT_CLOSE: &str = "close";

/// Synthetic event fired when the socket fails.
pub const EVENT_ERROR: &str = "error";

/// How long the opening handshake may take before the attempt is abandoned.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Reply routing slot: resolved with the payload or rejected with the
/// server's error value, at most once.
type PendingReply = oneshot::Sender<Result<Value, Value>>;

type EventListener = Arc<dyn Fn(Value) + Send + Sync>;

struct CommandInner {
    pending: DashMap<String, PendingReply>,
    events: DashMap<String, Vec<EventListener>>,
    writer: Mutex<Option<WsSink>>,
    connected: AtomicBool,
    status: StatusHandle,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Client for the bidirectional command socket.
///
/// Cheap to clone; clones share the socket and the pending-reply table.
#[derive(Clone)]
pub struct CommandClient {
    inner: Arc<CommandInner>,
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("connected", &self.inner.connected.load(Ordering::SeqCst))
            .field("pending", &self.inner.pending.len())
            .finish_non_exhaustive()
    }
}

impl CommandClient {
    /// Create a disconnected client, returning the status receiver.
    pub fn new() -> (Self, watch::Receiver<ConnectionStatus>) {
        let (status, status_rx) = StatusHandle::new();
        let client = Self {
            inner: Arc::new(CommandInner {
                pending: DashMap::new(),
                events: DashMap::new(),
                writer: Mutex::new(None),
                connected: AtomicBool::new(false),
                status,
                reader: std::sync::Mutex::new(None),
            }),
        };
        (client, status_rx)
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Register a listener for a named event. Listeners for the same event
    /// run in registration order; the synthetic [`EVENT_CLOSE`] and
    /// [`EVENT_ERROR`] names observe socket lifecycle.
    pub fn on_event<F>(&self, event: &str, listener: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner
            .events
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Open the socket at `ws://{host}:{port}/{path}` and start the reader.
    ///
    /// A handshake that has not completed within one second counts as a
    /// failed connection.
    pub async fn connect(&self, host: &str, port: u16, path: &str) -> ClientResult<()> {
        self.close().await;
        self.inner.status.set(ConnectionStatus::Connecting);

        let url = format!("ws://{host}:{port}/{path}");
        let handshake = timeout(HANDSHAKE_TIMEOUT, connect_async(&url)).await;
        let ws = match handshake {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(err)) => {
                self.inner.status.set(ConnectionStatus::Error);
                return Err(ClientError::ConnectionFailed(err.to_string()));
            }
            Err(_) => {
                self.inner.status.set(ConnectionStatus::Error);
                return Err(ClientError::ConnectionFailed(format!(
                    "handshake with {url} timed out"
                )));
            }
        };

        let (sink, source) = ws.split();
        *self.inner.writer.lock().await = Some(sink);
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.status.set(ConnectionStatus::Connected);

        let reader = tokio::spawn(read_loop(Arc::clone(&self.inner), source));
        if let Some(previous) = self
            .inner
            .reader
            .lock()
            .expect("reader mutex poisoned")
            .replace(reader)
        {
            previous.abort();
        }
        Ok(())
    }

    /// Send a command and wait for its correlated reply.
    ///
    /// Resolves with the reply payload, or [`ClientError::CommandRejected`]
    /// when the server answered with an error. A reply that never arrives
    /// keeps the caller pending until the client is explicitly closed,
    /// which settles it as [`ClientError::ConnectionLost`].
    pub async fn send_command(&self, command: &str, payload: Value) -> ClientResult<Value> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let request = CommandRequest::new(command, payload);
        let text = request
            .encode()
            .map_err(|err| ClientError::Serialization(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(request.id.clone(), tx);

        {
            let mut writer = self.inner.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                self.inner.pending.remove(&request.id);
                return Err(ClientError::NotConnected);
            };
            if let Err(err) = sink.send(Message::text(text)).await {
                self.inner.pending.remove(&request.id);
                return Err(ClientError::SendFailed(err.to_string()));
            }
        }

        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(error)) => Err(ClientError::CommandRejected(
                error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            )),
            // sender dropped: the client was closed with the reply pending
            Err(_) => Err(ClientError::ConnectionLost(
                "socket closed before the reply arrived".to_string(),
            )),
        }
    }

    /// Close the socket and settle every pending command as lost.
    pub async fn close(&self) {
        if let Some(reader) = self
            .inner
            .reader
            .lock()
            .expect("reader mutex poisoned")
            .take()
        {
            reader.abort();
        }
        if let Some(mut sink) = self.inner.writer.lock().await.take() {
            let _ = sink.close().await;
        }
        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        self.inner.status.demote_to_disconnected();
        // dropping the senders rejects every waiting caller
        self.inner.pending.clear();
        // The aborted reader cannot announce the close, so it is announced
        // here. The flag swap keeps the event exactly-once when the remote
        // end already closed and the reader fired it.
        if was_connected {
            dispatch_event(&self.inner, EVENT_CLOSE, Value::Null);
        }
    }
}

/// Route inbound frames until the socket goes away.
async fn read_loop(inner: Arc<CommandInner>, mut source: WsSource) {
    let mut errored = false;
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match ServerFrame::decode(&text) {
                Ok(ServerFrame::Reply { id, payload, error }) => {
                    let Some((_, slot)) = inner.pending.remove(&id) else {
                        // late or duplicate reply; the slot is gone
                        debug!(%id, "reply for unknown correlation id dropped");
                        continue;
                    };
                    let outcome = match error {
                        Some(error) => Err(error),
                        None => Ok(payload.unwrap_or(Value::Null)),
                    };
                    let _ = slot.send(outcome);
                }
                Ok(ServerFrame::Push { event, payload }) => {
                    dispatch_event(&inner, &event, payload);
                }
                Err(err) => debug!(%err, "dropping malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "command socket error");
                errored = true;
                break;
            }
        }
    }

    let was_connected = inner.connected.swap(false, Ordering::SeqCst);
    if errored {
        inner.status.set(ConnectionStatus::Error);
        dispatch_event(&inner, EVENT_ERROR, Value::Null);
    } else {
        inner.status.demote_to_disconnected();
    }
    // Pending replies deliberately stay parked: a remote close does not
    // reject in-flight commands, only an explicit close() does.
    if was_connected {
        dispatch_event(&inner, EVENT_CLOSE, Value::Null);
    }
}

fn dispatch_event(inner: &CommandInner, event: &str, payload: Value) {
    let listeners = inner
        .events
        .get(event)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();
    for listener in listeners {
        listener(payload.clone());
    }
}
