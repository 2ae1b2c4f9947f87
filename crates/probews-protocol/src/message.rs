//! Command envelopes and inbound frame decoding.
//!
//! Every message on the wire is a JSON object. Outbound commands carry a
//! correlation `id`; the server answers with a frame carrying the same `id`
//! and either a `payload` or an `error`. Frames without an `id` are channel
//! pushes keyed by an event name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Alphabet for correlation nonces. 62 symbols, drawn independently.
const NONCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a correlation nonce in characters.
const NONCE_LEN: usize = 32;

/// Generate a fresh correlation nonce.
///
/// 32 independent draws from a 62-symbol alphabet. Not cryptographically
/// secure, and not guaranteed globally unique, but the collision
/// probability over a session's worth of concurrently pending commands is
/// negligible.
pub fn correlation_nonce() -> String {
    let mut nonce = String::with_capacity(NONCE_LEN);
    for _ in 0..NONCE_LEN {
        let idx = fastrand::usize(..NONCE_ALPHABET.len());
        nonce.push(NONCE_ALPHABET[idx] as char);
    }
    nonce
}

/// An outbound command awaiting a correlated reply.
///
/// Serialized form: `{"id": "...", "command": "...", "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    /// Correlation identifier pairing this command with its reply.
    pub id: String,
    /// Command name understood by the server.
    pub command: String,
    /// Command arguments; shape depends on the command.
    pub payload: Value,
}

impl CommandRequest {
    /// Wrap a command and payload with a fresh correlation nonce.
    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        Self {
            id: correlation_nonce(),
            command: command.into(),
            payload,
        }
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Errors produced while decoding an inbound frame.
///
/// A malformed frame is dropped by the receiver; it never tears down the
/// socket it arrived on.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame was not valid JSON.
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame was a JSON object with neither an `id` nor an event name.
    #[error("frame carries neither an id nor an event discriminator")]
    MissingDiscriminator,

    /// The frame was valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Reply to a previously sent [`CommandRequest`], matched by `id`.
    Reply {
        /// Correlation identifier of the originating command.
        id: String,
        /// Result payload. Present on success.
        payload: Option<Value>,
        /// Error payload. Present when the command failed server-side.
        error: Option<Value>,
    },
    /// Unsolicited server push on a channel.
    Push {
        /// Logical event name. The server emits this under a `type` key on
        /// channel sockets and an `event` key on the command socket; both
        /// spellings are accepted here.
        event: String,
        /// Event payload.
        payload: Value,
    },
}

impl ServerFrame {
    /// Decode a frame from its wire text.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let obj = value.as_object().ok_or(FrameError::NotAnObject)?;

        if let Some(id) = obj.get("id").and_then(Value::as_str) {
            return Ok(Self::Reply {
                id: id.to_string(),
                payload: obj.get("payload").or_else(|| obj.get("result")).cloned(),
                error: obj.get("error").cloned(),
            });
        }

        let event = obj
            .get("type")
            .or_else(|| obj.get("event"))
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingDiscriminator)?;

        Ok(Self::Push {
            event: event.to_string(),
            payload: obj.get("payload").cloned().unwrap_or(Value::Null),
        })
    }
}
