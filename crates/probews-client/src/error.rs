//! Client error types.

use thiserror::Error;

/// A specialized `Result` type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Represents errors that can occur while talking to the dev-server.
///
/// Every variant renders to a single human-readable line; callers surface
/// the `Display` output directly, never a raw backtrace.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ClientError {
    /// No live port was found and the lazy reconnect also failed.
    #[error("not connected to a running game instance")]
    NotConnected,

    /// Failed to establish a connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to send a message or request.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// An HTTP call failed (network error or non-2xx status).
    #[error("request failed: {0}")]
    Http(String),

    /// The server rejected a correlated command.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// Failed to serialize or deserialize a message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The local project configuration could not be read.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}
