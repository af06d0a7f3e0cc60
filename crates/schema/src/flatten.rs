//! Dotted-path view of a resolved schema's properties for form renderers.

use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_FLATTEN_DEPTH: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlattenedSchema {
    /// `parent.child` path -> property schema.
    pub properties: Map<String, Value>,
    /// Required paths; only paths present in `properties` are listed.
    pub required: Vec<String>,
}

impl FlattenedSchema {
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Flatten `schema.properties`, expanding nested objects until paths reach
/// `max_depth` segments. An expandable object at the boundary is kept as an
/// opaque entry and its children are dropped.
pub fn flatten(schema: &Value, max_depth: usize) -> FlattenedSchema {
    let mut out = FlattenedSchema::default();
    if max_depth > 0 {
        walk(schema, "", 1, max_depth, &mut out);
    }
    out
}

fn walk(schema: &Value, prefix: &str, depth: usize, max_depth: usize, out: &mut FlattenedSchema) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else { return };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    for (name, prop) in props.iter() {
        let path = if prefix.is_empty() { name.clone() } else { format!("{}.{}", prefix, name) };
        if depth < max_depth && is_expandable(prop) {
            walk(prop, &path, depth + 1, max_depth, out);
            continue;
        }
        if required.contains(&name.as_str()) {
            out.required.push(path.clone());
        }
        out.properties.insert(path, prop.clone());
    }
}

/// Only `type: object` schemas with a non-empty `properties` map are expanded.
fn is_expandable(prop: &Value) -> bool {
    prop.get("type").and_then(Value::as_str) == Some("object")
        && prop.get("properties").and_then(Value::as_object).map(|p| !p.is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "type": "object",
            "required": ["spec"],
            "properties": {
                "kind": {"type": "string"},
                "spec": {
                    "type": "object",
                    "required": ["selector"],
                    "properties": {
                        "replicas": {"type": "integer"},
                        "selector": {"type": "object", "additionalProperties": true},
                        "template": {
                            "type": "object",
                            "properties": {
                                "metadata": {"type": "object", "properties": {"name": {"type": "string"}}},
                                "ports": {"type": "array", "items": {"type": "object", "properties": {"port": {"type": "integer"}}}}
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn expands_nested_objects_in_place_of_parent() {
        let f = flatten(&sample(), DEFAULT_FLATTEN_DEPTH);
        let keys: Vec<&str> = f.properties.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["kind", "spec.replicas", "spec.selector", "spec.template.metadata", "spec.template.ports"]
        );
        assert!(f.properties.get("spec").is_none());
        assert_eq!(f.properties["spec.template.ports"]["type"], "array");
    }

    #[test]
    fn paths_never_exceed_max_depth() {
        for depth in 1..=4 {
            let f = flatten(&sample(), depth);
            assert!(f.properties.keys().all(|k| k.split('.').count() <= depth), "depth {}", depth);
        }
        let shallow = flatten(&sample(), 1);
        assert_eq!(shallow.properties.len(), 2);
        assert_eq!(shallow.required, vec!["spec"]);
    }

    #[test]
    fn required_paths_are_qualified() {
        let f = flatten(&sample(), DEFAULT_FLATTEN_DEPTH);
        assert_eq!(f.required, vec!["spec.selector"]);
    }

    #[test]
    fn zero_depth_and_non_object_schemas_are_empty() {
        assert!(flatten(&sample(), 0).is_empty());
        assert!(flatten(&json!({"type": "string"}), 3).is_empty());
    }
}
