//! Metadata extraction: one pass over the top level of `definitions`.
//!
//! Only the `x-kubernetes-group-version-kind` extension and the top-level
//! `description` of each definition are read; schema bodies are left for the
//! resolver.

use std::sync::Arc;
use std::time::Instant;

use kforge_core::{Gvk, ResourceMetadata, SchemaError};
use serde_json::{Map, Value};
use tracing::info;

use crate::index::SchemaIndex;
use crate::node::{DESCRIPTION_KEY, GVK_EXTENSION};

/// Build an index from a borrowed document. Clones the definitions map; prefer
/// [`extract_from_document`] when the document can be moved.
pub fn extract_metadata(doc: &Value, source_tag: &str) -> Result<SchemaIndex, SchemaError> {
    let definitions = definitions_of(doc)?.clone();
    build(Arc::new(definitions), source_tag)
}

/// Build an index from an owned document, taking its `definitions` map.
pub fn extract_from_document(doc: Value, source_tag: &str) -> Result<SchemaIndex, SchemaError> {
    let definitions = match doc {
        Value::Object(mut root) => match root.remove("definitions") {
            Some(Value::Object(defs)) => defs,
            _ => return Err(missing_definitions()),
        },
        _ => return Err(missing_definitions()),
    };
    build(Arc::new(definitions), source_tag)
}

fn definitions_of(doc: &Value) -> Result<&Map<String, Value>, SchemaError> {
    doc.get("definitions").and_then(Value::as_object).ok_or_else(missing_definitions)
}

fn missing_definitions() -> SchemaError {
    SchemaError::MalformedInput("document has no `definitions` mapping".into())
}

fn build(definitions: Arc<Map<String, Value>>, source_tag: &str) -> Result<SchemaIndex, SchemaError> {
    let started = Instant::now();
    let source = if source_tag.is_empty() { None } else { Some(source_tag.to_string()) };
    let mut index = SchemaIndex::with_definitions(Arc::clone(&definitions));
    for (definition_key, node) in definitions.iter() {
        let Some(entries) = node.get(GVK_EXTENSION).and_then(Value::as_array) else { continue };
        let description = node.get(DESCRIPTION_KEY).and_then(Value::as_str).map(str::to_string);
        for (i, entry) in entries.iter().enumerate() {
            let gvk = parse_gvk_entry(definition_key, i, entry)?;
            index.insert(ResourceMetadata::new(gvk, definition_key.as_str(), description.clone(), source.clone()));
        }
    }
    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    metrics::histogram!("schema_extract_ms", elapsed_ms);
    metrics::gauge!("schema_index_resources", index.len() as f64);
    info!(
        definitions = definitions.len(),
        resources = index.len(),
        kinds = index.kind_count(),
        source = %source_tag,
        elapsed_ms,
        "indexed definitions"
    );
    Ok(index)
}

fn parse_gvk_entry(definition_key: &str, i: usize, entry: &Value) -> Result<Gvk, SchemaError> {
    let obj = entry.as_object().ok_or_else(|| {
        SchemaError::MalformedInput(format!("{}: {}[{}] is not an object", definition_key, GVK_EXTENSION, i))
    })?;
    let field = |name: &str| obj.get(name).and_then(Value::as_str).unwrap_or("");
    let (group, version, kind) = (field("group"), field("version"), field("kind"));
    for (name, value) in [("kind", kind), ("version", version)] {
        if value.is_empty() {
            return Err(SchemaError::MalformedInput(format!(
                "{}: {}[{}] is missing `{}`",
                definition_key, GVK_EXTENSION, i, name
            )));
        }
    }
    Ok(Gvk::new(group, version, kind))
}
