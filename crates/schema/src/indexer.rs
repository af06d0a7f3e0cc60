//! Owner of one loaded definitions document: its index and its resolution cache.
//!
//! Each indexer is an independent instance; a core Kubernetes document and a
//! CRD document can be loaded side by side without sharing any state.

use std::sync::Arc;
use std::time::Instant;

use kforge_core::{open_object_schema, ResolvedSchema, ResourceMetadata, SchemaError};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{CacheStats, ResolutionCache};
use crate::extract::extract_from_document;
use crate::flatten::{flatten, FlattenedSchema};
use crate::index::SchemaIndex;
use crate::resolve::{Resolver, DEFAULT_MAX_REF_DEPTH};
use crate::source::DocumentSource;

/// When `$ref` inlining happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Resolve a definition the first time it is requested.
    #[default]
    Lazy,
    /// Resolve every indexed definition right after extraction.
    Eager,
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Attached to every extracted [`ResourceMetadata`] as `source`.
    pub source_tag: String,
    pub max_ref_depth: usize,
    pub strategy: ResolutionStrategy,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self { source_tag: "kubernetes".into(), max_ref_depth: DEFAULT_MAX_REF_DEPTH, strategy: ResolutionStrategy::Lazy }
    }
}

impl IndexerOptions {
    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    pub fn with_max_ref_depth(mut self, depth: usize) -> Self {
        self.max_ref_depth = depth;
        self
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Metadata joined with its resolved schema. `apiVersion` is emitted on
/// serialization but always computed from `metadata`.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub metadata: ResourceMetadata,
    pub schema: Arc<ResolvedSchema>,
}

impl ResolvedResource {
    fn new(metadata: ResourceMetadata, schema: Arc<ResolvedSchema>) -> Self {
        Self { metadata, schema }
    }

    pub fn api_version(&self) -> String {
        self.metadata.api_version()
    }

    pub fn flatten(&self, max_depth: usize) -> FlattenedSchema {
        flatten(&self.schema, max_depth)
    }
}

impl Serialize for ResolvedResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            #[serde(flatten)]
            metadata: &'a ResourceMetadata,
            api_version: String,
            schema: &'a ResolvedSchema,
        }
        Wire { metadata: &self.metadata, api_version: self.api_version(), schema: &self.schema }.serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub generation: u64,
    pub definitions: usize,
    pub resources: usize,
    pub kinds: usize,
}

#[derive(Debug, Default)]
pub struct SchemaIndexer {
    options: IndexerOptions,
    index: SchemaIndex,
    cache: ResolutionCache,
    generation: u64,
}

impl SchemaIndexer {
    /// An indexer with nothing loaded.
    pub fn new(options: IndexerOptions) -> Self {
        Self { options, index: SchemaIndex::default(), cache: ResolutionCache::new(), generation: 0 }
    }

    pub fn from_value(doc: Value, options: IndexerOptions) -> Result<Self, SchemaError> {
        let mut me = Self::new(options);
        me.load_value(doc)?;
        Ok(me)
    }

    /// Await `source` once and replace the loaded document.
    ///
    /// The new index is fully built before it is installed, so a failed or
    /// abandoned load leaves the previous document in place.
    pub async fn load<S: DocumentSource>(&mut self, source: &S) -> Result<LoadSummary, SchemaError> {
        let started = Instant::now();
        let bytes = source.fetch().await?;
        let doc: Value = serde_json::from_slice(&bytes)?;
        let summary = self.load_value(doc)?;
        info!(
            source = %source.describe(),
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0,
            "definitions loaded"
        );
        Ok(summary)
    }

    pub fn load_value(&mut self, doc: Value) -> Result<LoadSummary, SchemaError> {
        let index = extract_from_document(doc, &self.options.source_tag)?;
        let mut cache = ResolutionCache::new();
        if self.options.strategy == ResolutionStrategy::Eager {
            warm(&index, &mut cache, self.options.max_ref_depth);
        }
        self.index = index;
        self.cache = cache;
        self.generation += 1;
        Ok(LoadSummary {
            generation: self.generation,
            definitions: self.index.definitions().len(),
            resources: self.index.len(),
            kinds: self.index.kind_count(),
        })
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    pub fn index(&self) -> &SchemaIndex {
        &self.index
    }

    /// Incremented on every successful load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn available_kinds(&self) -> Vec<String> {
        self.index.available_kinds()
    }

    /// Every version/source of `kind` with its resolved schema; empty when unknown.
    pub fn kind_versions(&mut self, kind: &str) -> Vec<ResolvedResource> {
        let max_depth = self.options.max_ref_depth;
        let index = &self.index;
        let cache = &mut self.cache;
        index.entries_for_kind(kind).into_iter().map(|meta| resolved_for(index, cache, max_depth, meta)).collect()
    }

    pub fn schema_by_gvk(&mut self, group: &str, version: &str, kind: &str) -> Option<ResolvedResource> {
        let meta = self.index.metadata_by_gvk(group, version, kind)?;
        Some(resolved_for(&self.index, &mut self.cache, self.options.max_ref_depth, meta))
    }

    /// Lookup by `v1/Pod`, `core/v1/Pod` or `apps/v1/Deployment`.
    pub fn schema_by_key(&mut self, key: &str) -> Option<ResolvedResource> {
        let meta = self.index.metadata_by_key(key)?;
        Some(resolved_for(&self.index, &mut self.cache, self.options.max_ref_depth, meta))
    }

    /// Lookup by a manifest's `apiVersion` and `kind`.
    pub fn schema_by_api_version(&mut self, api_version: &str, kind: &str) -> Option<ResolvedResource> {
        let meta = self.index.metadata_by_api_version(api_version, kind)?;
        Some(resolved_for(&self.index, &mut self.cache, self.options.max_ref_depth, meta))
    }

    /// Resolve a definition key through the cache.
    pub fn resolve(&mut self, definition_key: &str) -> Result<Arc<ResolvedSchema>, SchemaError> {
        resolve_cached(&self.index, &mut self.cache, self.options.max_ref_depth, definition_key)
    }

    pub fn search_resources(&self, query: &str) -> Vec<ResourceMetadata> {
        self.index.search_resources(query)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats(self.index.kind_count())
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

fn resolve_cached(
    index: &SchemaIndex,
    cache: &mut ResolutionCache,
    max_depth: usize,
    definition_key: &str,
) -> Result<Arc<ResolvedSchema>, SchemaError> {
    if let Some(hit) = cache.get(definition_key) {
        return Ok(hit);
    }
    let resolved = Resolver::new(index.definitions(), max_depth).resolve(definition_key)?;
    Ok(cache.put(definition_key, resolved))
}

/// Resolve for a metadata entry, degrading to an open object when its node is gone.
fn resolved_for(
    index: &SchemaIndex,
    cache: &mut ResolutionCache,
    max_depth: usize,
    meta: &ResourceMetadata,
) -> ResolvedResource {
    let schema = match resolve_cached(index, cache, max_depth, &meta.definition_key) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, key = %meta.key, "no backing definition; using open object schema");
            Arc::new(Value::Object(open_object_schema()))
        }
    };
    ResolvedResource::new(meta.clone(), schema)
}

fn warm(index: &SchemaIndex, cache: &mut ResolutionCache, max_depth: usize) {
    let started = Instant::now();
    let resolver = Resolver::new(index.definitions(), max_depth);
    for key in index.definition_keys() {
        match resolver.resolve(key) {
            Ok(schema) => {
                cache.put(key, schema);
            }
            Err(e) => warn!(error = %e, definition = %key, "eager resolution failed"),
        }
    }
    info!(cached = cache.len(), elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0, "eager resolution done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({"definitions": {
            "io.k8s.api.core.v1.ConfigMap": {
                "type": "object",
                "properties": {"data": {"type": "object", "additionalProperties": {"type": "string"}},
                               "metadata": {"$ref": "#/definitions/io.k8s.apimachinery.pkg.apis.meta.v1.ObjectMeta"}},
                "x-kubernetes-group-version-kind": [{"group": "", "kind": "ConfigMap", "version": "v1"}]
            },
            "io.k8s.apimachinery.pkg.apis.meta.v1.ObjectMeta": {
                "type": "object", "properties": {"name": {"type": "string"}}
            }
        }})
    }

    #[test]
    fn lazy_strategy_starts_with_empty_cache() {
        let ix = SchemaIndexer::from_value(doc(), IndexerOptions::default()).unwrap();
        assert_eq!(ix.cache_stats().cached_schemas, 0);
        assert_eq!(ix.generation(), 1);
    }

    #[test]
    fn eager_strategy_warms_the_cache() {
        let opts = IndexerOptions::default().with_strategy(ResolutionStrategy::Eager);
        let mut ix = SchemaIndexer::from_value(doc(), opts).unwrap();
        assert_eq!(ix.cache_stats().cached_schemas, 1);
        let r = ix.schema_by_gvk("core", "v1", "ConfigMap").unwrap();
        assert_eq!(r.schema["properties"]["metadata"]["properties"]["name"]["type"], "string");
        assert_eq!(ix.cache_stats().hits, 1);
    }

    #[test]
    fn reload_clears_cache_and_bumps_generation() {
        let mut ix = SchemaIndexer::from_value(doc(), IndexerOptions::default()).unwrap();
        ix.schema_by_key("v1/ConfigMap").unwrap();
        assert_eq!(ix.cache_stats().cached_schemas, 1);
        let summary = ix.load_value(doc()).unwrap();
        assert_eq!(summary.generation, 2);
        assert_eq!(summary.resources, 1);
        assert_eq!(ix.cache_stats().cached_schemas, 0);
    }

    #[test]
    fn failed_reload_keeps_previous_document() {
        let mut ix = SchemaIndexer::from_value(doc(), IndexerOptions::default()).unwrap();
        let err = ix.load_value(json!({"paths": {}})).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedInput(_)));
        assert_eq!(ix.generation(), 1);
        assert!(ix.schema_by_gvk("", "v1", "ConfigMap").is_some());
    }

    #[test]
    fn unknown_definition_key_is_unresolved_reference() {
        let mut ix = SchemaIndexer::from_value(doc(), IndexerOptions::default()).unwrap();
        let err = ix.resolve("io.k8s.api.core.v1.Nope").unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedReference(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_backing_node_degrades_to_open_object() {
        let mut index = SchemaIndex::with_definitions(Arc::new(serde_json::Map::new()));
        let meta = ResourceMetadata::new(kforge_core::Gvk::new("", "v1", "Secret"), "io.k8s.api.core.v1.Secret", None, None);
        index.insert(meta.clone());
        let mut cache = ResolutionCache::new();
        let r = resolved_for(&index, &mut cache, DEFAULT_MAX_REF_DEPTH, &meta);
        assert_eq!(*r.schema, json!({"type": "object", "additionalProperties": true}));
        assert_eq!(r.api_version(), "v1");
        assert!(cache.is_empty());
    }

    #[test]
    fn resolved_resource_serializes_api_version() {
        let mut ix = SchemaIndexer::from_value(doc(), IndexerOptions::default()).unwrap();
        let r = ix.schema_by_api_version("v1", "ConfigMap").unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["apiVersion"], "v1");
        assert_eq!(v["key"], "core/v1/ConfigMap");
        assert_eq!(v["displayName"], "ConfigMap v1");
        assert!(v["schema"]["properties"].is_object());
    }

    #[test]
    fn serialized_api_version_follows_metadata() {
        let doc = json!({"definitions": {
            "io.k8s.api.rbac.v1.RoleBinding": {
                "type": "object",
                "x-kubernetes-group-version-kind": [{"group": "rbac.authorization.k8s.io", "version": "v1", "kind": "RoleBinding"}]
            }
        }});
        let mut ix = SchemaIndexer::from_value(doc, IndexerOptions::default()).unwrap();
        let mut r = ix.schema_by_gvk("rbac.authorization.k8s.io", "v1", "RoleBinding").unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["apiVersion"], "rbac.authorization.k8s.io/v1");
        assert_eq!(v["apiVersion"], r.metadata.api_version());

        r.metadata.version = "v1beta1".into();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["apiVersion"], "rbac.authorization.k8s.io/v1beta1");
        assert_eq!(v["apiVersion"], r.api_version());
    }
}
