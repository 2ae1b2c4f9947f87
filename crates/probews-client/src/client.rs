//! Multi-socket connection manager.
//!
//! [`ProbeWebClient`] owns the HTTP side of the dev-server API and one
//! WebSocket per subscribed channel path. Connecting resolves the actual
//! server port by scanning a window of candidates (the game shifts its port
//! on bind conflicts), then brings up every channel socket and notifies the
//! on-connected hooks. HTTP calls lazily reconnect when the liveness flag
//! has dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use probews_protocol::{ChannelEvent, ServerFrame, SessionInfo};

use crate::channels::{ChannelHandler, ChannelRegistry, ConnectedHook};
use crate::config::ProbeConfig;
use crate::error::{ClientError, ClientResult};
use crate::scan::{resolve_port, PORT_SCAN_WINDOW};
use crate::status::{ConnectionStatus, StatusHandle};

/// Grace period before the first-ever scan; the game is usually still
/// booting when the editor activates.
const FIRST_START_WARMUP: Duration = Duration::from_secs(4);

/// Delay between the HTTP listener answering and the sockets being opened
/// on a first start. The HTTP listener comes up slightly before the
/// WebSocket listener.
const LISTENER_SETTLE: Duration = Duration::from_secs(1);

/// Timeout for one liveness probe.
const PING_TIMEOUT: Duration = Duration::from_millis(20);

struct ClientInner {
    host: String,
    config_port: u16,
    auth: Option<String>,
    http: reqwest::Client,
    /// Port actually in use; may differ from `config_port` after a scan.
    current_port: AtomicU16,
    /// True once a liveness probe succeeded and until the sockets drop.
    live: AtomicBool,
    open_sockets: AtomicUsize,
    expected_sockets: AtomicUsize,
    /// Bumped on every teardown. Socket tasks carry the generation they
    /// were spawned under and stale ones must not touch the counter or
    /// the status; the old readers are not awaited during a reconnect.
    generation: AtomicU64,
    status: StatusHandle,
    channels: ChannelRegistry,
    /// Per-connection shutdown fanout; replaced wholesale on reconnect so
    /// a superseded generation's signal never reaches new sockets.
    shutdown: Mutex<broadcast::Sender<()>>,
    socket_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeWebClient")
            .field("host", &self.host)
            .field("config_port", &self.config_port)
            .field("current_port", &self.current_port.load(Ordering::SeqCst))
            .field("live", &self.live.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Client for the dev-server HTTP API plus its channel sockets.
///
/// Constructed once at activation and passed by handle to every dependent
/// feature; cloning is cheap and clones share all connection state.
#[derive(Debug, Clone)]
pub struct ProbeWebClient {
    inner: Arc<ClientInner>,
}

impl ProbeWebClient {
    /// Create a client for a local game instance, returning the status
    /// receiver UI code subscribes to. No connection is attempted yet.
    pub fn new(config: &ProbeConfig) -> (Self, watch::Receiver<ConnectionStatus>) {
        Self::with_host("127.0.0.1", config)
    }

    /// Create a client targeting an arbitrary host.
    pub fn with_host(
        host: impl Into<String>,
        config: &ProbeConfig,
    ) -> (Self, watch::Receiver<ConnectionStatus>) {
        let (status, status_rx) = StatusHandle::new();
        let (shutdown, _) = broadcast::channel(4);
        let client = Self {
            inner: Arc::new(ClientInner {
                host: host.into(),
                config_port: config.port,
                auth: config.auth.clone(),
                http: reqwest::Client::new(),
                current_port: AtomicU16::new(config.port),
                live: AtomicBool::new(false),
                open_sockets: AtomicUsize::new(0),
                expected_sockets: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                status,
                channels: ChannelRegistry::default(),
                shutdown: Mutex::new(shutdown),
                socket_tasks: Mutex::new(Vec::new()),
            }),
        };
        (client, status_rx)
    }

    /// Register a handler for pushes on `path`. All handlers for a path
    /// run in registration order for every message.
    pub fn register_handler<F, Fut>(&self, path: &str, handler: F)
    where
        F: Fn(ChannelEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ChannelHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.inner.channels.add_handler(path, handler);
    }

    /// Set the session hello sent on `path` right after its socket opens.
    /// Replaces any previous registration for the path.
    pub fn register_initializer(&self, path: &str, info: SessionInfo) {
        self.inner.channels.set_initializer(path, info);
    }

    /// Register a hook invoked after every successful connect.
    pub fn on_connected<F, Fut>(&self, hook: F)
    where
        F: Fn(ProbeWebClient, u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ConnectedHook = Arc::new(move |client, port| Box::pin(hook(client, port)));
        self.inner.channels.add_connected_hook(hook);
    }

    /// Whether the last liveness check succeeded and the connection has
    /// not dropped since.
    pub fn is_connected(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// The resolved server port, when connected.
    pub fn connected_port(&self) -> Option<u16> {
        if self.is_connected() {
            Some(self.inner.current_port.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.get()
    }

    /// Probe one candidate port: bare `GET /` with a short timeout.
    async fn ping(&self, port: u16) -> bool {
        let url = format!("http://{}:{}/", self.inner.host, port);
        match self.inner.http.get(&url).timeout(PING_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Attempt to reach the server, scanning the port window and falling
    /// back to the configured port before giving up.
    ///
    /// Returns `true` on success. On exhaustion the status goes to the
    /// sticky [`ConnectionStatus::Error`] and no automatic retry happens;
    /// reconnecting is up to the caller (typically user-triggered).
    pub async fn try_connect(&self, first_start: bool) -> bool {
        if first_start {
            sleep(FIRST_START_WARMUP).await;
        }

        self.inner.live.store(false, Ordering::SeqCst);
        self.inner.status.set(ConnectionStatus::Connecting);

        let resolved = resolve_port(self.inner.config_port, PORT_SCAN_WINDOW, |port| {
            self.ping(port)
        })
        .await;

        let Some(resolved) = resolved else {
            self.inner.status.set(ConnectionStatus::Error);
            warn!(
                base_port = self.inner.config_port,
                window = PORT_SCAN_WINDOW,
                "connection failed after scanning the port window; is the game running?"
            );
            return false;
        };

        let port = resolved.port;
        self.inner.current_port.store(port, Ordering::SeqCst);
        // The HTTP listener answers before the socket listener is ready; a
        // port that only answered on the fallback retry was still binding
        // and gets the same grace even on a reconnect.
        if first_start || resolved.via_fallback {
            sleep(LISTENER_SETTLE).await;
        }

        info!(port, "connected to dev-server");
        self.inner.live.store(true, Ordering::SeqCst);
        self.inner.status.set(ConnectionStatus::Connected);
        self.connect_channels();

        for hook in self.inner.channels.connected_hooks() {
            hook(self.clone(), port).await;
        }
        true
    }

    /// Close every channel socket. Idempotent; a superseded connection
    /// attempt settling later cannot resurrect the old sockets.
    pub fn disconnect(&self) {
        self.shutdown_sockets();
        self.inner.live.store(false, Ordering::SeqCst);
        self.inner.status.demote_to_disconnected();
    }

    /// User-triggered reconnect: tear down, then attempt again without the
    /// first-start warm-up.
    pub async fn reconnect(&self) -> bool {
        self.disconnect();
        self.try_connect(false).await
    }

    fn shutdown_sockets(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.inner.shutdown.lock().expect("shutdown mutex poisoned");
        let _ = guard.send(());
        // fresh channel for the next generation of sockets
        let (next, _) = broadcast::channel(4);
        *guard = next;

        let mut tasks = self
            .inner
            .socket_tasks
            .lock()
            .expect("socket task mutex poisoned");
        // tasks exit on the shutdown signal; dropping the handles detaches them
        tasks.clear();
    }

    /// Open one socket per registered channel path.
    fn connect_channels(&self) {
        self.shutdown_sockets();

        let paths = self.inner.channels.channel_paths();
        self.inner
            .expected_sockets
            .store(paths.len(), Ordering::SeqCst);
        self.inner.open_sockets.store(0, Ordering::SeqCst);

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let mut tasks = Vec::with_capacity(paths.len());
        for path in paths {
            let shutdown_rx = self
                .inner
                .shutdown
                .lock()
                .expect("shutdown mutex poisoned")
                .subscribe();
            tasks.push(tokio::spawn(run_channel_socket(
                Arc::clone(&self.inner),
                path,
                generation,
                shutdown_rx,
            )));
        }

        *self
            .inner
            .socket_tasks
            .lock()
            .expect("socket task mutex poisoned") = tasks;
    }

    fn base_url(&self, path: &str) -> String {
        format!(
            "http://{}:{}{}",
            self.inner.host,
            self.inner.current_port.load(Ordering::SeqCst),
            path
        )
    }

    async fn ensure_connected(&self) -> ClientResult<()> {
        if self.inner.live.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.try_connect(false).await {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// `GET` a JSON endpoint, lazily reconnecting first when the liveness
    /// flag has dropped.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.ensure_connected().await?;
        let mut request = self.inner.http.get(self.base_url(path));
        if let Some(auth) = &self.inner.auth {
            request = request.header(AUTHORIZATION, auth.as_str());
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// `POST` a JSON body and decode a JSON reply.
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.ensure_connected().await?;
        let mut request = self.inner.http.post(self.base_url(path)).json(body);
        if let Some(auth) = &self.inner.auth {
            request = request.header(AUTHORIZATION, auth.as_str());
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// `POST` a JSON body and return the raw response text.
    pub async fn post_text<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<String> {
        self.ensure_connected().await?;
        let mut request = self.inner.http.post(self.base_url(path)).json(body);
        if let Some(auth) = &self.inner.auth {
            request = request.header(AUTHORIZATION, auth.as_str());
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Translation keys referenced by scripts but missing from every lang
    /// file.
    pub async fn missing_lang_keys(&self) -> ClientResult<HashMap<String, String>> {
        self.get_json("/api/probejs/missing-lang-keys").await
    }

    /// The JSON definition of one recipe by id.
    pub async fn recipe_json(&self, recipe_id: &str) -> ClientResult<Value> {
        let encoded = crate::registry::encode_segment(recipe_id);
        self.get_json(&format!("/api/probejs/recipe-id?recipe-id={encoded}"))
            .await
    }

    /// Recipe types the server can document.
    pub async fn supported_recipe_types(&self) -> ClientResult<Vec<String>> {
        self.get_json("/api/probejs/list-supported-recipes").await
    }

    /// Generated documentation for the given recipe types.
    pub async fn recipe_docs(&self, recipe_types: &[String]) -> ClientResult<String> {
        self.post_text("/api/probejs/get-recipe-docs", recipe_types)
            .await
    }
}

/// Serve one channel: connect, announce the session, then dispatch pushes
/// until the socket closes or the connection generation shuts down.
async fn run_channel_socket(
    inner: Arc<ClientInner>,
    path: String,
    generation: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let port = inner.current_port.load(Ordering::SeqCst);
    let url = format!("ws://{}:{}/{}", inner.host, port, path);
    debug!(channel = %path, %url, "opening channel socket");

    let mut request = match url.as_str().into_client_request() {
        Ok(request) => request,
        Err(err) => {
            warn!(channel = %path, %err, "invalid channel url");
            socket_errored(&inner, generation, false);
            return;
        }
    };
    if let Some(auth) = &inner.auth {
        match HeaderValue::from_str(auth) {
            Ok(value) => {
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(err) => {
                warn!(channel = %path, %err, "auth value is not a valid header");
                socket_errored(&inner, generation, false);
                return;
            }
        }
    }

    let mut ws = match connect_async(request).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            warn!(channel = %path, %err, "channel handshake failed; is the game running?");
            socket_errored(&inner, generation, false);
            return;
        }
    };

    if let Some(info) = inner.channels.initializer_for(&path) {
        let hello = info.hello_frame().to_string();
        if let Err(err) = ws.send(Message::text(hello)).await {
            warn!(channel = %path, %err, "session hello failed");
            socket_errored(&inner, generation, false);
            return;
        }
    }

    // A reconnect may have superseded this task while it was still
    // handshaking; its socket must not count against the new generation.
    if inner.generation.load(Ordering::SeqCst) != generation {
        let _ = ws.close(None).await;
        return;
    }

    let open = inner.open_sockets.fetch_add(1, Ordering::SeqCst) + 1;
    if open == inner.expected_sockets.load(Ordering::SeqCst) {
        debug!(sockets = open, "all channel sockets open");
    }

    let mut errored = false;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                let _ = ws.close(None).await;
                break;
            }
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => match ServerFrame::decode(&text) {
                    Ok(ServerFrame::Push { event, payload }) => {
                        let event = ChannelEvent::decode(&event, payload);
                        for handler in inner.channels.handlers_for(&path) {
                            handler(event.clone()).await;
                        }
                    }
                    // channel sockets carry no correlated replies
                    Ok(ServerFrame::Reply { id, .. }) => {
                        debug!(channel = %path, %id, "unexpected reply frame on channel socket");
                    }
                    Err(err) => debug!(channel = %path, %err, "dropping malformed frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    warn!(channel = %path, %err, "channel socket error");
                    errored = true;
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    if errored {
        socket_errored(&inner, generation, true);
    } else {
        socket_closed(&inner, generation);
    }
}

/// One open socket went away cleanly. The last one flips liveness and
/// reports `Disconnected`, unless a sticky error got there first.
///
/// A socket from a superseded generation is ignored entirely: the counter
/// and status it knew about belong to a connection that no longer exists.
fn socket_closed(inner: &ClientInner, generation: u64) {
    if inner.generation.load(Ordering::SeqCst) != generation {
        debug!(generation, "stale socket closed after reconnect");
        return;
    }
    let previous = inner
        .open_sockets
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some(n.saturating_sub(1))
        })
        .unwrap_or(0);
    if previous == 1 {
        inner.live.store(false, Ordering::SeqCst);
        inner.status.demote_to_disconnected();
        info!("all channel sockets closed");
    }
}

/// A socket failed. Error state is sticky and the remaining sockets are
/// brought down with it, mirroring the all-or-nothing channel setup.
/// Stale generations are ignored the same way as in [`socket_closed`].
fn socket_errored(inner: &ClientInner, generation: u64, was_open: bool) {
    if inner.generation.load(Ordering::SeqCst) != generation {
        debug!(generation, "stale socket errored after reconnect");
        return;
    }
    inner.status.set(ConnectionStatus::Error);
    inner.live.store(false, Ordering::SeqCst);
    if was_open {
        let _ = inner
            .open_sockets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
    }
    let _ = inner
        .shutdown
        .lock()
        .expect("shutdown mutex poisoned")
        .send(());
}
