//! Payload shapes for the REST side of the dev-server API.
//!
//! Registry listings and key/tag endpoints return bare `Vec<String>` and
//! need no types of their own; the structured endpoints are modeled here.

use serde::{Deserialize, Serialize};

/// One row from the item search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemEntry {
    /// Registry identifier, `namespace:path`.
    pub id: String,
    /// Localized display name.
    pub name: String,
    /// Icon file relative to the search response's icon base path.
    #[serde(default)]
    pub icon: Option<String>,
}

/// Response of `GET /api/client/search/items`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemSearchResponse {
    /// All searchable item entries.
    #[serde(default)]
    pub items: Vec<ItemEntry>,
    /// Base path icons are resolved against, when the server exports them.
    #[serde(default)]
    pub icon_path: Option<String>,
}

/// One installed mod, from `GET /api/probejs/mods`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModEntry {
    /// Mod identifier.
    pub id: String,
    /// Human-readable mod name.
    pub name: String,
    /// Mod version, when reported.
    #[serde(default)]
    pub version: Option<String>,
}

/// Split a `namespace:path` registry identifier.
///
/// Identifiers without a namespace default to `minecraft`, matching the
/// game's own resource-location parsing.
pub fn split_registry_id(id: &str) -> (&str, &str) {
    match id.split_once(':') {
        Some((namespace, path)) => (namespace, path),
        None => ("minecraft", id),
    }
}
