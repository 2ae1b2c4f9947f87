//! Externally observable connection state.
//!
//! The status surface is a `watch` channel: the connection manager writes
//! transitions, UI code subscribes to the receiver. The `Error` state is
//! sticky: a transient socket close never downgrades it; only the next
//! successful connect clears it.

use tokio::sync::watch;

/// Connection state as observed from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A connection attempt is in flight.
    Connecting,
    /// At least the HTTP side is live; sockets are up or coming up.
    Connected,
    /// All sockets closed without an error.
    Disconnected,
    /// A connect attempt failed or a socket errored. Sticky until the next
    /// successful connect.
    Error,
}

/// Writer half of the status surface.
#[derive(Debug)]
pub struct StatusHandle {
    tx: watch::Sender<ConnectionStatus>,
}

impl StatusHandle {
    /// Create a handle starting in [`ConnectionStatus::Disconnected`],
    /// returning the receiver consumers subscribe to.
    pub fn new() -> (Self, watch::Receiver<ConnectionStatus>) {
        let (tx, rx) = watch::channel(ConnectionStatus::Disconnected);
        (Self { tx }, rx)
    }

    /// Current status.
    pub fn get(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    /// Unconditionally set the status.
    pub fn set(&self, status: ConnectionStatus) {
        // send_replace never fails even with no receivers alive
        self.tx.send_replace(status);
    }

    /// Transition to `Disconnected` unless the current state is the sticky
    /// `Error`.
    pub fn demote_to_disconnected(&self) {
        self.tx.send_if_modified(|current| {
            if *current == ConnectionStatus::Error || *current == ConnectionStatus::Disconnected {
                false
            } else {
                *current = ConnectionStatus::Disconnected;
                true
            }
        });
    }

    /// Subscribe another receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}
