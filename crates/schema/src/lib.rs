//! kforge schema engine.
//!
//! Indexes a Kubernetes `_definitions.json` document by kind and by
//! group/version/kind without touching schema bodies, then resolves `$ref`
//! graphs lazily into inlined, description-free schemas that are memoized per
//! definition key. [`SchemaIndexer`] owns one loaded document and is the entry
//! point for lookups.

#![forbid(unsafe_code)]

pub mod cache;
pub mod extract;
pub mod flatten;
pub mod index;
pub mod indexer;
pub mod node;
pub mod resolve;
pub mod source;
#[cfg(feature = "jsonschema-validate")]
pub mod validate;

pub use cache::{CacheStats, ResolutionCache};
pub use extract::{extract_from_document, extract_metadata};
pub use flatten::{flatten, FlattenedSchema, DEFAULT_FLATTEN_DEPTH};
pub use index::SchemaIndex;
pub use indexer::{IndexerOptions, LoadSummary, ResolutionStrategy, ResolvedResource, SchemaIndexer};
pub use kforge_core::{ResolvedSchema, ResourceMetadata, SchemaError};
pub use resolve::{Resolver, DEFAULT_MAX_REF_DEPTH};
pub use source::{BytesSource, DocumentSource, FileSource};
