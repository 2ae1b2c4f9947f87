//! # probews-protocol
//!
//! Wire-format types for the ProbeJS dev-server API exposed by a running
//! KubeJS game instance. This crate is the source of truth for everything
//! that crosses the socket:
//!
//! - **Command envelopes**: outbound `{id, command, payload}` requests and
//!   the inbound frames that answer them ([`CommandRequest`], [`ServerFrame`])
//! - **Session handshake**: the `{"type":"$"}` hello a channel socket sends
//!   right after it opens ([`SessionInfo`])
//! - **Channel events**: a tagged union over the server-pushed event names,
//!   so handlers are checked against the payload shape ([`ChannelEvent`])
//! - **REST payloads**: item search results, mod entries and friends
//!   ([`api`])
//!
//! The crate deliberately has no I/O: it only encodes, decodes and
//! generates correlation nonces. Transports live in `probews-client`.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod api;
pub mod events;
pub mod message;
pub mod session;

pub use api::{split_registry_id, ItemEntry, ItemSearchResponse, ModEntry};
pub use events::{
    ChannelEvent, ConsoleLine, HighlightBlock, HighlightFlags, HighlightItem, HighlightItems,
    ReloadSummary, SourceLine,
};
pub use message::{correlation_nonce, CommandRequest, FrameError, ServerFrame};
pub use session::SessionInfo;
