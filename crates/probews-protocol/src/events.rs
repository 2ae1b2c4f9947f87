//! Typed channel events.
//!
//! Channel pushes arrive as `{type, payload}` frames keyed by an event name.
//! Instead of handing loosely-typed JSON to every handler, the known event
//! names are decoded into a tagged union up front; unrecognized names are
//! preserved as [`ChannelEvent::Other`] rather than treated as errors, so a
//! newer server never breaks an older client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A script-reload progress report pushed on the updates channel once a
/// reload has finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReloadSummary {
    /// Script pack that reloaded (`startup`, `server`, `client`).
    #[serde(rename = "type")]
    pub script_type: String,
    /// Total number of scripts considered.
    pub total: u64,
    /// Scripts that loaded cleanly.
    pub successful: u64,
    /// Scripts that failed with an error.
    pub errors: u64,
    /// Scripts that loaded with warnings.
    pub warnings: u64,
    /// Reload duration in seconds.
    pub time: f64,
}

/// A source location attached to a console line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLine {
    /// Script source file.
    pub source: String,
    /// 1-based line number.
    pub line: u64,
}

/// One line from a console stream channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsoleLine {
    /// Log level (`info`, `warn`, `error`, ...).
    #[serde(rename = "type")]
    pub level: String,
    /// Rendered message text.
    pub message: String,
    /// Server-side timestamp, milliseconds since the epoch.
    pub timestamp: u64,
    /// Locations inside the script that produced the line.
    #[serde(default)]
    pub script_source_lines: Vec<SourceLine>,
    /// All stack locations, script or not.
    #[serde(default)]
    pub all_source_lines: Vec<SourceLine>,
    /// Raw stack trace, if any.
    #[serde(default)]
    pub stack_trace: Vec<String>,
}

/// An item stack highlighted in game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HighlightItem {
    /// Stack size.
    pub count: u64,
    /// Registry identifier, `namespace:path`.
    pub id: String,
    /// Attached data components.
    #[serde(default)]
    pub components: serde_json::Map<String, Value>,
}

/// Modifier keys held while highlighting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HighlightFlags {
    /// Shift was held.
    #[serde(default)]
    pub shift: bool,
    /// Ctrl was held.
    #[serde(default)]
    pub ctrl: bool,
    /// Alt was held.
    #[serde(default)]
    pub alt: bool,
}

/// Payload of a `server/highlight/items` push. Older servers send a bare
/// array; newer ones wrap it with modifier flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HighlightItems {
    /// Bare list of stacks.
    List(Vec<HighlightItem>),
    /// Stacks plus the modifier keys held at highlight time.
    WithFlags {
        /// Highlighted stacks.
        items: Vec<HighlightItem>,
        /// Modifier keys, when the server reports them.
        #[serde(default)]
        flags: Option<HighlightFlags>,
    },
}

impl HighlightItems {
    /// The highlighted stacks, regardless of wrapping.
    pub fn items(&self) -> &[HighlightItem] {
        match self {
            Self::List(items) => items,
            Self::WithFlags { items, .. } => items,
        }
    }
}

/// A block highlighted in game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HighlightBlock {
    /// Registry identifier of the block.
    pub id: String,
    /// Dimension the block lives in.
    pub dimension: String,
    /// Block state properties.
    #[serde(default)]
    pub properties: std::collections::HashMap<String, String>,
    /// Block entity data, if present.
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    /// Attached data components.
    #[serde(default)]
    pub components: serde_json::Map<String, Value>,
    /// Block position.
    pub pos: BlockPos,
}

/// A block position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockPos {
    /// X coordinate.
    pub x: i64,
    /// Y coordinate.
    pub y: i64,
    /// Z coordinate.
    pub z: i64,
}

/// A decoded channel push, keyed by the event name on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// `before_scripts_loaded`: a reload is about to begin.
    BeforeScriptsLoaded {
        /// Script pack about to reload.
        script_type: String,
    },
    /// `after_scripts_loaded`: a reload finished.
    ScriptsLoaded(ReloadSummary),
    /// A console line on one of the console stream channels.
    Console(ConsoleLine),
    /// `server/highlight/items`: item stacks highlighted in game.
    HighlightItems(HighlightItems),
    /// `server/highlight/block`: a block highlighted in game.
    HighlightBlock(Box<HighlightBlock>),
    /// Any event name this client does not know about.
    Other {
        /// Event name as received.
        event: String,
        /// Raw payload.
        payload: Value,
    },
}

impl ChannelEvent {
    /// Map an event name and payload to a typed event.
    ///
    /// Payloads that fail to parse under a known event name fall back to
    /// [`ChannelEvent::Other`] so a handler still sees the raw data.
    pub fn decode(event: &str, payload: Value) -> Self {
        let fallback = |payload: Value| Self::Other {
            event: event.to_string(),
            payload,
        };

        match event {
            "before_scripts_loaded" => {
                match payload.get("type").and_then(Value::as_str) {
                    Some(script_type) => Self::BeforeScriptsLoaded {
                        script_type: script_type.to_string(),
                    },
                    None => fallback(payload),
                }
            }
            "after_scripts_loaded" => match serde_json::from_value(payload.clone()) {
                Ok(summary) => Self::ScriptsLoaded(summary),
                Err(_) => fallback(payload),
            },
            "info" | "warn" | "error" | "debug" => {
                match serde_json::from_value(payload.clone()) {
                    Ok(line) => Self::Console(line),
                    Err(_) => fallback(payload),
                }
            }
            "server/highlight/items" => match serde_json::from_value(payload.clone()) {
                Ok(items) => Self::HighlightItems(items),
                Err(_) => fallback(payload),
            },
            "server/highlight/block" => match serde_json::from_value(payload.clone()) {
                Ok(block) => Self::HighlightBlock(Box::new(block)),
                Err(_) => fallback(payload),
            },
            _ => fallback(payload),
        }
    }

    /// The event name this variant decodes from, or the raw name for
    /// [`ChannelEvent::Other`].
    pub fn event_name(&self) -> &str {
        match self {
            Self::BeforeScriptsLoaded { .. } => "before_scripts_loaded",
            Self::ScriptsLoaded(_) => "after_scripts_loaded",
            Self::Console(line) => &line.level,
            Self::HighlightItems(_) => "server/highlight/items",
            Self::HighlightBlock(_) => "server/highlight/block",
            Self::Other { event, .. } => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn reload_summary_decodes_from_after_scripts_loaded() {
        let payload = json!({
            "type": "server",
            "total": 12,
            "successful": 11,
            "errors": 1,
            "warnings": 0,
            "time": 0.42,
        });
        match ChannelEvent::decode("after_scripts_loaded", payload) {
            ChannelEvent::ScriptsLoaded(summary) => {
                assert_eq!(summary.script_type, "server");
                assert_eq!(summary.errors, 1);
            }
            other => panic!("expected ScriptsLoaded, got {other:?}"),
        }
    }

    #[test]
    fn console_lines_decode_with_missing_optional_fields() {
        let payload = json!({
            "type": "error",
            "message": "ReferenceError: x is not defined",
            "timestamp": 1700000000000u64,
            "script_source_lines": [{"source": "server_scripts/main.js", "line": 3}],
        });
        match ChannelEvent::decode("error", payload) {
            ChannelEvent::Console(line) => {
                assert_eq!(line.level, "error");
                assert_eq!(line.script_source_lines.len(), 1);
                assert!(line.stack_trace.is_empty());
            }
            other => panic!("expected Console, got {other:?}"),
        }
    }

    #[test]
    fn highlight_items_accepts_bare_arrays_and_wrapped_objects() {
        let bare = json!([{"count": 64, "id": "minecraft:stone"}]);
        let wrapped = json!({
            "items": [{"count": 1, "id": "minecraft:diamond"}],
            "flags": {"ctrl": true},
        });

        match ChannelEvent::decode("server/highlight/items", bare) {
            ChannelEvent::HighlightItems(items) => assert_eq!(items.items().len(), 1),
            other => panic!("expected HighlightItems, got {other:?}"),
        }
        match ChannelEvent::decode("server/highlight/items", wrapped) {
            ChannelEvent::HighlightItems(HighlightItems::WithFlags { items, flags }) => {
                assert_eq!(items[0].id, "minecraft:diamond");
                assert!(flags.unwrap().ctrl);
            }
            other => panic!("expected wrapped HighlightItems, got {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_preserved_not_rejected() {
        let event = ChannelEvent::decode("server/some_future_event", json!({"a": 1}));
        assert_eq!(
            event,
            ChannelEvent::Other {
                event: "server/some_future_event".to_string(),
                payload: json!({"a": 1}),
            }
        );
        assert_eq!(event.event_name(), "server/some_future_event");
    }

    #[test]
    fn malformed_known_event_falls_back_to_other() {
        let event = ChannelEvent::decode("after_scripts_loaded", json!("not an object"));
        assert!(matches!(event, ChannelEvent::Other { .. }));
    }
}
