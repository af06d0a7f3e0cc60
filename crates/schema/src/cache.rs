//! In-memory memo of resolved schemas, keyed by definition key.

use std::sync::Arc;

use kforge_core::ResolvedSchema;
use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_kinds: usize,
    pub cached_schemas: usize,
    /// `cached_schemas / total_kinds`; informational only.
    pub cache_hit_ratio: f64,
    pub hits: u64,
    pub misses: u64,
}

/// Unbounded: one entry per distinct definition key of the loaded document.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: FxHashMap<String, Arc<ResolvedSchema>>,
    hits: u64,
    misses: u64,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, definition_key: &str) -> Option<Arc<ResolvedSchema>> {
        match self.entries.get(definition_key) {
            Some(s) => {
                self.hits += 1;
                metrics::counter!("schema_cache_hits_total", 1u64);
                Some(Arc::clone(s))
            }
            None => {
                self.misses += 1;
                metrics::counter!("schema_cache_misses_total", 1u64);
                None
            }
        }
    }

    /// Lookup without touching hit/miss counters.
    pub fn peek(&self, definition_key: &str) -> Option<&Arc<ResolvedSchema>> {
        self.entries.get(definition_key)
    }

    pub fn put(&mut self, definition_key: impl Into<String>, schema: ResolvedSchema) -> Arc<ResolvedSchema> {
        let schema = Arc::new(schema);
        self.entries.insert(definition_key.into(), Arc::clone(&schema));
        metrics::gauge!("schema_cache_entries", self.entries.len() as f64);
        schema
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
        metrics::gauge!("schema_cache_entries", 0.0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self, total_kinds: usize) -> CacheStats {
        let cached = self.entries.len();
        let ratio = if total_kinds == 0 { 0.0 } else { cached as f64 / total_kinds as f64 };
        CacheStats { total_kinds, cached_schemas: cached, cache_hit_ratio: ratio, hits: self.hits, misses: self.misses }
    }
}
