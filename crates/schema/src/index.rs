//! Metadata-only index over a definitions document.

use std::sync::Arc;

use kforge_core::{gvk_key, Gvk, ResourceMetadata};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use tracing::debug;

pub type KindEntries = SmallVec<[ResourceMetadata; 2]>;

/// `kind -> [metadata]` and `group/version/kind -> metadata` over one document.
///
/// Built once by the extractor and replaced wholesale on reload. Holds the raw
/// definitions map so resolution can be served from the same document the
/// metadata came from.
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    definitions: Arc<Map<String, Value>>,
    by_kind: FxHashMap<String, KindEntries>,
    by_gvk: FxHashMap<String, ResourceMetadata>,
}

impl SchemaIndex {
    pub(crate) fn with_definitions(definitions: Arc<Map<String, Value>>) -> Self {
        Self { definitions, by_kind: FxHashMap::default(), by_gvk: FxHashMap::default() }
    }

    /// Insert unless the GVK key is already taken; returns whether it was added.
    pub(crate) fn insert(&mut self, meta: ResourceMetadata) -> bool {
        if let Some(existing) = self.by_gvk.get(&meta.key) {
            debug!(key = %meta.key, kept = %existing.definition_key, skipped = %meta.definition_key, "duplicate GVK");
            return false;
        }
        self.by_kind.entry(meta.kind.clone()).or_default().push(meta.clone());
        self.by_gvk.insert(meta.key.clone(), meta);
        true
    }

    pub fn definitions(&self) -> &Map<String, Value> {
        &self.definitions
    }

    pub fn definition(&self, definition_key: &str) -> Option<&Value> {
        self.definitions.get(definition_key)
    }

    /// Number of indexed GVKs.
    pub fn len(&self) -> usize {
        self.by_gvk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gvk.is_empty()
    }

    pub fn kind_count(&self) -> usize {
        self.by_kind.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceMetadata> {
        self.by_gvk.values()
    }

    /// Distinct kinds, lexicographically sorted.
    pub fn available_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.by_kind.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Metadata entries for `kind`, sorted by key. Empty when unknown.
    pub fn entries_for_kind(&self, kind: &str) -> Vec<&ResourceMetadata> {
        let mut out: Vec<&ResourceMetadata> = self.by_kind.get(kind).map(|v| v.iter().collect()).unwrap_or_default();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Exact lookup. `group` may be `""` or `"core"` for the legacy group.
    pub fn metadata_by_gvk(&self, group: &str, version: &str, kind: &str) -> Option<&ResourceMetadata> {
        self.by_gvk.get(&gvk_key(group, version, kind))
    }

    pub fn metadata_by_key(&self, key: &str) -> Option<&ResourceMetadata> {
        let gvk = Gvk::parse_key(key)?;
        self.by_gvk.get(&gvk.key())
    }

    /// Lookup by a manifest's `apiVersion` + `kind`.
    pub fn metadata_by_api_version(&self, api_version: &str, kind: &str) -> Option<&ResourceMetadata> {
        let gvk = Gvk::from_api_version(api_version, kind)?;
        self.by_gvk.get(&gvk.key())
    }

    /// Distinct definition keys referenced by indexed metadata, sorted.
    pub fn definition_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.by_gvk.values().map(|m| m.definition_key.as_str()).collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Case-insensitive substring search over kind, display name and description,
    /// sorted by display name. A blank query returns nothing.
    pub fn search_resources(&self, query: &str) -> Vec<ResourceMetadata> {
        let q = query.trim();
        if q.is_empty() {
            return Vec::new();
        }
        let q = q.to_lowercase();
        let mut out: Vec<ResourceMetadata> = self
            .by_gvk
            .values()
            .filter(|m| {
                m.kind.to_lowercase().contains(&q)
                    || m.display_name.to_lowercase().contains(&q)
                    || m.description.as_deref().map(|d| d.to_lowercase().contains(&q)).unwrap_or(false)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.display_name.cmp(&b.display_name).then_with(|| a.key.cmp(&b.key)));
        out
    }
}
