//! Channel session handshake.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Session metadata announced to the server right after a channel socket
/// opens.
///
/// The server uses `source` to attribute the session and `tags` to decide
/// which pushes the channel should receive (e.g. `"highlight"`,
/// `"after_scripts_loaded"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    /// Identifies the connecting tool.
    pub source: String,
    /// Capability tags the session subscribes to.
    pub tags: Vec<String>,
}

impl SessionInfo {
    /// Create session info for the given source and tags.
    pub fn new(source: impl Into<String>, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            source: source.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the hello frame sent as the channel initializer:
    /// `{"type":"$","payload":{"source":...,"tags":[...]}}`.
    pub fn hello_frame(&self) -> Value {
        json!({
            "type": "$",
            "payload": self,
        })
    }
}
