//! Lazy `$ref` inlining over a definitions map.
//!
//! Resolution is a depth-first walk. Each chain of `$ref` hops carries its own
//! ancestry (definition keys currently being expanded above the node), so a
//! pointer back into the ancestry is a cycle while the same target reached from
//! a sibling branch is simply expanded again. Cycles, missing targets and
//! chains longer than the hop bound all collapse to an open object schema.

use std::time::Instant;

use kforge_core::{open_object_schema, ResolvedSchema, SchemaError};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::node::{is_description_annotation, is_name_map, SchemaNode, REF_KEY};

pub const DEFAULT_MAX_REF_DEPTH: usize = 10;

pub struct Resolver<'d> {
    definitions: &'d Map<String, Value>,
    max_depth: usize,
}

impl<'d> Resolver<'d> {
    pub fn new(definitions: &'d Map<String, Value>, max_depth: usize) -> Self {
        Self { definitions, max_depth }
    }

    /// Fully inline the definition stored under `definition_key`.
    ///
    /// Fails only when `definition_key` itself is absent; problems further down
    /// the graph are recovered locally.
    pub fn resolve(&self, definition_key: &str) -> Result<ResolvedSchema, SchemaError> {
        let definitions: &'d Map<String, Value> = self.definitions;
        let (key, body) = definitions
            .get_key_value(definition_key)
            .ok_or_else(|| SchemaError::UnresolvedReference(definition_key.to_string()))?;
        let started = Instant::now();
        let mut ancestry: Vec<&'d str> = vec![key.as_str()];
        let out = self.walk(body, &mut ancestry, 0);
        metrics::histogram!("schema_resolve_ms", started.elapsed().as_secs_f64() * 1_000.0);
        debug!(definition = %definition_key, "resolved definition");
        Ok(out)
    }

    fn walk(&self, value: &'d Value, ancestry: &mut Vec<&'d str>, hops: usize) -> Value {
        match SchemaNode::classify(value) {
            SchemaNode::Leaf(v) => v.clone(),
            SchemaNode::Array(items) => Value::Array(items.iter().map(|item| self.walk(item, ancestry, hops)).collect()),
            SchemaNode::Object(map) => Value::Object(self.walk_members(map, ancestry, hops)),
            SchemaNode::Ref { target, node } => self.walk_ref(target, node, ancestry, hops),
        }
    }

    /// Resolve every member except `$ref` and description annotations.
    fn walk_members(&self, map: &'d Map<String, Value>, ancestry: &mut Vec<&'d str>, hops: usize) -> Map<String, Value> {
        let mut out = Map::new();
        for (k, v) in map.iter() {
            if k == REF_KEY || is_description_annotation(k, v) {
                continue;
            }
            let resolved = match v {
                Value::Object(named) if is_name_map(k) => Value::Object(
                    named.iter().map(|(name, schema)| (name.clone(), self.walk(schema, ancestry, hops))).collect(),
                ),
                _ => self.walk(v, ancestry, hops),
            };
            out.insert(k.clone(), resolved);
        }
        out
    }

    fn walk_ref(
        &self,
        target: Option<&'d str>,
        node: &'d Map<String, Value>,
        ancestry: &mut Vec<&'d str>,
        hops: usize,
    ) -> Value {
        let siblings = self.walk_members(node, ancestry, hops);
        let Some(target) = target else {
            warn!(pointer = ?node.get(REF_KEY), "unsupported $ref pointer; using open object");
            metrics::counter!("schema_ref_missing_total", 1u64);
            return open_object(siblings);
        };
        if ancestry.contains(&target) {
            debug!(target = %target, chain = ?ancestry, "circular $ref; using open object");
            metrics::counter!("schema_ref_cycles_total", 1u64);
            return open_object(siblings);
        }
        if hops >= self.max_depth {
            debug!(target = %target, max_depth = self.max_depth, "$ref depth exhausted; using open object");
            metrics::counter!("schema_ref_depth_exhausted_total", 1u64);
            return open_object(siblings);
        }
        let definitions: &'d Map<String, Value> = self.definitions;
        let Some((key, body)) = definitions.get_key_value(target) else {
            warn!(target = %target, "$ref target not found; using open object");
            metrics::counter!("schema_ref_missing_total", 1u64);
            return open_object(siblings);
        };
        ancestry.push(key.as_str());
        let resolved = self.walk(body, ancestry, hops + 1);
        ancestry.pop();
        overlay(resolved, siblings)
    }
}

/// `{ ...siblings, type: object, additionalProperties: true }`
fn open_object(mut siblings: Map<String, Value>) -> Value {
    siblings.extend(open_object_schema());
    Value::Object(siblings)
}

/// Overlay sibling members of a `$ref` on the resolved target; siblings win.
fn overlay(resolved: Value, siblings: Map<String, Value>) -> Value {
    if siblings.is_empty() {
        return resolved;
    }
    match resolved {
        Value::Object(mut base) => {
            base.extend(siblings);
            Value::Object(base)
        }
        _ => Value::Object(siblings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn inlines_refs_and_strips_descriptions() {
        let d = defs(json!({
            "A": {"description": "a", "type": "object", "properties": {"b": {"$ref": "#/definitions/B"}}},
            "B": {"description": "b", "type": "string"}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("A").unwrap();
        assert_eq!(out, json!({"type": "object", "properties": {"b": {"type": "string"}}}));
    }

    #[test]
    fn self_reference_becomes_open_object() {
        let d = defs(json!({
            "Node": {"type": "object", "properties": {
                "name": {"type": "string"},
                "child": {"$ref": "#/definitions/Node"}
            }}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("Node").unwrap();
        assert_eq!(out["properties"]["child"], json!({"type": "object", "additionalProperties": true}));
        assert_eq!(out["properties"]["name"], json!({"type": "string"}));
    }

    #[test]
    fn circular_ref_keeps_resolved_siblings() {
        let d = defs(json!({
            "Props": {"type": "object", "properties": {
                "not": {"$ref": "#/definitions/Props", "description": "negation", "nullable": true, "x-kubernetes-preserve-unknown-fields": true}
            }}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("Props").unwrap();
        assert_eq!(
            out["properties"]["not"],
            json!({
                "nullable": true,
                "x-kubernetes-preserve-unknown-fields": true,
                "type": "object",
                "additionalProperties": true
            })
        );
    }

    #[test]
    fn mutual_recursion_terminates() {
        let d = defs(json!({
            "A": {"type": "object", "properties": {"b": {"$ref": "#/definitions/B"}}},
            "B": {"type": "object", "properties": {"a": {"$ref": "#/definitions/A"}}}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("A").unwrap();
        assert_eq!(
            out["properties"]["b"]["properties"]["a"],
            json!({"type": "object", "additionalProperties": true})
        );
    }

    #[test]
    fn sibling_branches_do_not_share_ancestry() {
        let d = defs(json!({
            "Root": {"type": "object", "properties": {
                "left": {"$ref": "#/definitions/Leaf"},
                "right": {"$ref": "#/definitions/Leaf"}
            }},
            "Leaf": {"type": "integer"}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("Root").unwrap();
        assert_eq!(out["properties"]["left"], json!({"type": "integer"}));
        assert_eq!(out["properties"]["right"], json!({"type": "integer"}));
    }

    #[test]
    fn missing_target_falls_back_and_keeps_siblings() {
        let d = defs(json!({
            "A": {"type": "object", "properties": {"x": {"$ref": "#/definitions/Gone", "default": {}}}}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("A").unwrap();
        assert_eq!(
            out["properties"]["x"],
            json!({"default": {}, "type": "object", "additionalProperties": true})
        );
    }

    #[test]
    fn siblings_override_resolved_target() {
        let d = defs(json!({
            "A": {"properties": {"q": {"$ref": "#/definitions/Q", "format": "quantity"}}},
            "Q": {"type": "string", "format": "int-or-string"}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("A").unwrap();
        assert_eq!(out["properties"]["q"], json!({"type": "string", "format": "quantity"}));
    }

    #[test]
    fn depth_bound_stops_long_chains() {
        let d = defs(json!({
            "L0": {"$ref": "#/definitions/L1"},
            "L1": {"$ref": "#/definitions/L2"},
            "L2": {"$ref": "#/definitions/L3"},
            "L3": {"type": "string"}
        }));
        let shallow = Resolver::new(&d, 2).resolve("L0").unwrap();
        assert_eq!(shallow, json!({"type": "object", "additionalProperties": true}));
        let deep = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("L0").unwrap();
        assert_eq!(deep, json!({"type": "string"}));
    }

    #[test]
    fn property_named_description_survives() {
        let d = defs(json!({
            "Ann": {"type": "object", "properties": {"description": {"type": "string", "description": "doc"}}}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("Ann").unwrap();
        assert_eq!(out["properties"]["description"], json!({"type": "string"}));
    }

    #[test]
    fn arrays_resolve_elementwise() {
        let d = defs(json!({
            "A": {"type": "object", "properties": {"list": {"type": "array", "items": {"$ref": "#/definitions/I"}}},
                  "allOf": [{"$ref": "#/definitions/I"}]},
            "I": {"type": "boolean", "description": "flag"}
        }));
        let out = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("A").unwrap();
        assert_eq!(out["properties"]["list"]["items"], json!({"type": "boolean"}));
        assert_eq!(out["allOf"], json!([{"type": "boolean"}]));
    }

    #[test]
    fn unknown_root_is_unresolved_reference() {
        let d = defs(json!({}));
        let err = Resolver::new(&d, DEFAULT_MAX_REF_DEPTH).resolve("Nope").unwrap_err();
        assert!(matches!(err, SchemaError::UnresolvedReference(k) if k == "Nope"));
    }
}
