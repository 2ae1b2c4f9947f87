//! Project-local configuration.
//!
//! The game writes a small JSON settings file into the modpack workspace;
//! the client reads it once at startup and never writes it back.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Default port the dev-server binds when the configured one is free.
pub const DEFAULT_PORT: u16 = 61423;

/// Relative location of the settings file inside a modpack workspace.
pub const SETTINGS_PATH: &str = ".probe/settings.json";

/// Client configuration read from the project settings file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Whether the dev-server integration is enabled at all.
    pub enabled: bool,
    /// Port the server was configured to bind. The actual port may differ
    /// after a scan; see the connection manager.
    pub port: u16,
    /// Authorization header value sent on every HTTP call and WebSocket
    /// handshake, when the server requires one.
    pub auth: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_PORT,
            auth: None,
        }
    }
}

impl ProbeConfig {
    /// Load the configuration from `<workspace>/.probe/settings.json`.
    ///
    /// A missing file yields the defaults (integration disabled); a file
    /// that exists but cannot be parsed is a configuration error.
    pub fn load(workspace: &Path) -> ClientResult<Self> {
        let path = workspace.join(SETTINGS_PATH);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ClientError::Configuration(format!(
                    "cannot read {}: {err}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&text).map_err(|err| {
            ClientError::Configuration(format!("cannot parse {}: {err}", path.display()))
        })
    }
}
