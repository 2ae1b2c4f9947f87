//! Cached game-registry data.
//!
//! Registry contents only change on a reload, so the client fetches them
//! wholesale after every connect and publishes the result as an immutable
//! snapshot. Readers grab the current snapshot lock-free; a refresh builds
//! a complete replacement and swaps it in, so no reader ever observes a
//! half-updated mix of old and new worlds.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, warn};

use probews_protocol::{split_registry_id, ItemEntry, ItemSearchResponse, ModEntry};

use crate::client::ProbeWebClient;
use crate::error::ClientResult;

/// Path-segment encoding: everything but unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode one path segment of a registry or recipe id.
pub(crate) fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT).to_string()
}

/// One complete, immutable view of the server's registries.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// When this snapshot was assembled.
    pub timestamp: Option<DateTime<Utc>>,
    /// Registry id (`minecraft:item`) to its element keys.
    pub objects: HashMap<String, Vec<String>>,
    /// Registry id to the tag names declared for it.
    pub tags: HashMap<String, Vec<String>>,
    /// Searchable item entries with display names.
    pub items: Vec<ItemEntry>,
    /// Display name to its position in `items`, so a name picked from a
    /// search UI resolves back to the raw id and icon.
    pub item_index: HashMap<String, usize>,
    /// Base path item icons are served under, when the server exports one.
    pub icon_path: Option<String>,
    /// Mods loaded in the running instance.
    pub mods: Vec<ModEntry>,
    /// Every known recipe id, flattened across recipe types and sorted.
    pub recipe_ids: Vec<String>,
    /// Language key to its current translation.
    pub translations: HashMap<String, String>,
}

impl RegistrySnapshot {
    /// Keys of one registry, by its full id.
    pub fn keys(&self, registry_id: &str) -> Option<&[String]> {
        self.objects.get(registry_id).map(Vec::as_slice)
    }

    /// Resolve a display name back to its item entry.
    pub fn item_by_name(&self, name: &str) -> Option<&ItemEntry> {
        self.item_index.get(name).map(|&idx| &self.items[idx])
    }
}

/// Lock-free handle to the latest [`RegistrySnapshot`].
///
/// Holds nothing until the first refresh completes; [`attach`] wires the
/// refresh to run after every successful connect.
///
/// [`attach`]: DynamicRegistry::attach
#[derive(Debug, Default)]
pub struct DynamicRegistry {
    current: ArcSwapOption<RegistrySnapshot>,
}

impl DynamicRegistry {
    /// Create an empty registry cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The latest snapshot, if any refresh has completed.
    pub fn data(&self) -> Option<Arc<RegistrySnapshot>> {
        self.current.load_full()
    }

    /// Register a connect hook that refreshes this cache on the given
    /// client.
    pub fn attach(self: &Arc<Self>, client: &ProbeWebClient) {
        let registry = Arc::clone(self);
        client.on_connected(move |client, port| {
            let registry = Arc::clone(&registry);
            async move {
                debug!(port, "refreshing registry cache");
                registry.refresh(&client).await;
            }
        });
    }

    /// Fetch every registry slice and swap in a fresh snapshot.
    ///
    /// Best-effort: a slice that fails to fetch is logged and left empty in
    /// the new snapshot rather than aborting the whole refresh, so one
    /// broken endpoint does not starve the rest of the data.
    pub async fn refresh(&self, client: &ProbeWebClient) {
        let mut snapshot = RegistrySnapshot::default();

        match fetch_registries(client).await {
            Ok((objects, tags)) => {
                snapshot.objects = objects;
                snapshot.tags = tags;
            }
            Err(err) => warn!(%err, "registry key refresh failed"),
        }

        match client
            .get_json::<ItemSearchResponse>("/api/client/search/items")
            .await
        {
            Ok(response) => {
                snapshot.item_index = response
                    .items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| (item.name.clone(), idx))
                    .collect();
                snapshot.items = response.items;
                snapshot.icon_path = response.icon_path;
            }
            Err(err) => warn!(%err, "item search refresh failed"),
        }

        match client.get_json::<Vec<ModEntry>>("/api/probejs/mods").await {
            Ok(mods) => snapshot.mods = mods,
            Err(err) => warn!(%err, "mod list refresh failed"),
        }

        match client
            .get_json::<HashMap<String, Vec<String>>>("/api/probejs/recipe-ids")
            .await
        {
            Ok(by_type) => {
                let mut ids: Vec<String> = by_type.into_values().flatten().collect();
                ids.sort_unstable();
                ids.dedup();
                snapshot.recipe_ids = ids;
            }
            Err(err) => warn!(%err, "recipe id refresh failed"),
        }

        match client
            .get_json::<HashMap<String, String>>("/api/probejs/lang-keys")
            .await
        {
            Ok(translations) => snapshot.translations = translations,
            Err(err) => warn!(%err, "lang key refresh failed"),
        }

        snapshot.timestamp = Some(Utc::now());
        debug!(
            registries = snapshot.objects.len(),
            items = snapshot.items.len(),
            recipes = snapshot.recipe_ids.len(),
            "registry snapshot replaced"
        );
        self.current.store(Some(Arc::new(snapshot)));
    }
}

/// Fetch the registry list, then keys and tag names per registry.
async fn fetch_registries(
    client: &ProbeWebClient,
) -> ClientResult<(HashMap<String, Vec<String>>, HashMap<String, Vec<String>>)> {
    let registry_ids: Vec<String> = client.get_json("/api/registries").await?;

    let mut objects = HashMap::with_capacity(registry_ids.len());
    let mut tags = HashMap::with_capacity(registry_ids.len());
    for id in registry_ids {
        let (namespace, path) = split_registry_id(&id);
        let namespace = encode_segment(namespace);
        let path = encode_segment(path);

        match client
            .get_json::<Vec<String>>(&format!("/api/registries/{namespace}/{path}/keys"))
            .await
        {
            Ok(keys) => {
                objects.insert(id.clone(), keys);
            }
            Err(err) => warn!(registry = %id, %err, "registry keys unavailable"),
        }
        match client
            .get_json::<Vec<String>>(&format!("/api/tags/{namespace}/{path}"))
            .await
        {
            Ok(names) => {
                tags.insert(id, names);
            }
            Err(err) => warn!(registry = %id, %err, "registry tags unavailable"),
        }
    }
    Ok((objects, tags))
}

/// Elements of one tag in one registry, fetched on demand. Tag membership
/// is not cached: the set is small and queried rarely.
pub async fn tag_values(
    client: &ProbeWebClient,
    registry_id: &str,
    tag_id: &str,
) -> ClientResult<Vec<String>> {
    let (rns, rpath) = split_registry_id(registry_id);
    let (tns, tpath) = split_registry_id(tag_id);
    let path = format!(
        "/api/tags/{}/{}/values/{}/{}",
        encode_segment(rns),
        encode_segment(rpath),
        encode_segment(tns),
        encode_segment(tpath),
    );
    client.get_json(&path).await
}
