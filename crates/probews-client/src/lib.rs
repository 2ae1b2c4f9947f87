//! Client runtime for the in-game dev-server.
//!
//! Talks to a locally running game instance over HTTP and WebSocket:
//! resolves the server's actual port by scanning, keeps one socket per
//! subscribed event channel, correlates request/reply commands by nonce,
//! and caches registry data as immutable snapshots refreshed on connect.
//!
//! # Quick start
//!
//! ```no_run
//! use probews_client::{ProbeConfig, ProbeWebClient, DynamicRegistry};
//! use probews_protocol::SessionInfo;
//!
//! # async fn run() {
//! let config = ProbeConfig::load(std::path::Path::new(".")).unwrap_or_default();
//! let (client, _status) = ProbeWebClient::new(&config);
//!
//! client.register_handler("api/updates", |event| async move {
//!     println!("push: {event:?}");
//! });
//! client.register_initializer(
//!     "api/console/startup/stream",
//!     SessionInfo::new("editor", ["script_error"]),
//! );
//!
//! let registry = DynamicRegistry::new();
//! registry.attach(&client);
//!
//! client.try_connect(true).await;
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

mod channels;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod registry;
pub mod scan;
pub mod status;

pub use channels::{ChannelHandler, ConnectedHook};
pub use client::ProbeWebClient;
pub use commands::{CommandClient, EVENT_CLOSE, EVENT_ERROR};
pub use config::{ProbeConfig, DEFAULT_PORT, SETTINGS_PATH};
pub use error::{ClientError, ClientResult};
pub use registry::{tag_values, DynamicRegistry, RegistrySnapshot};
pub use scan::{resolve_port, ResolvedPort, PORT_SCAN_WINDOW};
pub use status::{ConnectionStatus, StatusHandle};
