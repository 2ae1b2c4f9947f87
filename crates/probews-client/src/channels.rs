//! Channel handler registry.
//!
//! Each subscribed channel path is served by exactly one socket; every
//! handler registered for that path runs, in registration order, for every
//! push the socket delivers. A path may additionally carry one session
//! initializer: the hello announced to the server right after the socket
//! opens. Re-registering an initializer replaces the previous one.

use std::fmt;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::BoxFuture;
use probews_protocol::{ChannelEvent, SessionInfo};

use crate::client::ProbeWebClient;

/// An async handler invoked for every push on its channel.
pub type ChannelHandler = Arc<dyn Fn(ChannelEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// A hook invoked after every successful connect, in registration order.
///
/// Hooks receive a client handle so dependent refreshes (the registry
/// cache) can issue their own requests without holding a reference cycle.
pub type ConnectedHook = Arc<dyn Fn(ProbeWebClient, u16) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
pub(crate) struct ChannelRegistry {
    handlers: DashMap<String, Vec<ChannelHandler>>,
    initializers: DashMap<String, SessionInfo>,
    on_connected: Mutex<Vec<ConnectedHook>>,
}

impl ChannelRegistry {
    pub(crate) fn add_handler(&self, path: &str, handler: ChannelHandler) {
        self.handlers.entry(path.to_string()).or_default().push(handler);
    }

    /// At most one initializer per path; the last registration wins.
    pub(crate) fn set_initializer(&self, path: &str, info: SessionInfo) {
        self.initializers.insert(path.to_string(), info);
    }

    pub(crate) fn add_connected_hook(&self, hook: ConnectedHook) {
        self.on_connected
            .lock()
            .expect("on_connected mutex poisoned")
            .push(hook);
    }

    /// Paths that get a socket on connect.
    pub(crate) fn channel_paths(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of the handlers for one path. Cloned so dispatch never
    /// holds a map guard across an await point.
    pub(crate) fn handlers_for(&self, path: &str) -> Vec<ChannelHandler> {
        self.handlers
            .get(path)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub(crate) fn initializer_for(&self, path: &str) -> Option<SessionInfo> {
        self.initializers.get(path).map(|entry| entry.value().clone())
    }

    pub(crate) fn connected_hooks(&self) -> Vec<ConnectedHook> {
        self.on_connected
            .lock()
            .expect("on_connected mutex poisoned")
            .clone()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.handlers.len())
            .field("initializers", &self.initializers.len())
            .finish_non_exhaustive()
    }
}
