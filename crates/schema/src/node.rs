//! Closed view over the JSON-Schema constructs found in definitions documents.

use serde_json::{Map, Value};

pub const REF_PREFIX: &str = "#/definitions/";
pub const REF_KEY: &str = "$ref";
pub const DESCRIPTION_KEY: &str = "description";
pub const GVK_EXTENSION: &str = "x-kubernetes-group-version-kind";

/// Borrowed, classified schema node.
#[derive(Debug, Clone, Copy)]
pub enum SchemaNode<'a> {
    /// Object carrying `$ref`. `target` is `None` when the pointer is not a
    /// `#/definitions/<key>` string.
    Ref { target: Option<&'a str>, node: &'a Map<String, Value> },
    Object(&'a Map<String, Value>),
    Array(&'a [Value]),
    Leaf(&'a Value),
}

impl<'a> SchemaNode<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Object(map) => match map.get(REF_KEY) {
                Some(pointer) => SchemaNode::Ref { target: pointer.as_str().and_then(ref_target), node: map },
                None => SchemaNode::Object(map),
            },
            Value::Array(items) => SchemaNode::Array(items),
            other => SchemaNode::Leaf(other),
        }
    }

    /// Members of a `$ref` node other than the pointer itself.
    pub fn siblings(&self) -> impl Iterator<Item = (&'a String, &'a Value)> {
        let map = match *self {
            SchemaNode::Ref { node, .. } => Some(node),
            _ => None,
        };
        map.into_iter().flat_map(|m| m.iter()).filter(|(k, _)| k.as_str() != REF_KEY)
    }
}

/// Extract `<key>` from `#/definitions/<key>`.
pub fn ref_target(pointer: &str) -> Option<&str> {
    pointer.strip_prefix(REF_PREFIX).filter(|k| !k.is_empty())
}

/// Members whose keys are user-chosen names mapped to schemas, not schema keywords.
pub fn is_name_map(key: &str) -> bool {
    matches!(key, "properties" | "patternProperties" | "definitions")
}

/// A `description` member that is an annotation (string), not a property named `description`.
pub fn is_description_annotation(key: &str, value: &Value) -> bool {
    key == DESCRIPTION_KEY && value.is_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_ref_nodes() {
        let v = json!({"$ref": "#/definitions/io.k8s.api.core.v1.PodSpec", "description": "x"});
        match SchemaNode::classify(&v) {
            SchemaNode::Ref { target, .. } => assert_eq!(target, Some("io.k8s.api.core.v1.PodSpec")),
            other => panic!("unexpected {:?}", other),
        }
        let siblings: Vec<_> = SchemaNode::classify(&v).siblings().map(|(k, _)| k.clone()).collect();
        assert_eq!(siblings, vec!["description".to_string()]);
    }

    #[test]
    fn foreign_pointers_have_no_target() {
        let v = json!({"$ref": "#/components/schemas/Foo"});
        assert!(matches!(SchemaNode::classify(&v), SchemaNode::Ref { target: None, .. }));
        let v = json!({"$ref": 42});
        assert!(matches!(SchemaNode::classify(&v), SchemaNode::Ref { target: None, .. }));
        assert_eq!(ref_target("#/definitions/"), None);
    }

    #[test]
    fn classifies_plain_values() {
        assert!(matches!(SchemaNode::classify(&json!({"type": "string"})), SchemaNode::Object(_)));
        assert!(matches!(SchemaNode::classify(&json!([1, 2])), SchemaNode::Array(_)));
        assert!(matches!(SchemaNode::classify(&json!("s")), SchemaNode::Leaf(_)));
    }

    #[test]
    fn description_annotation_vs_property() {
        assert!(is_description_annotation("description", &json!("text")));
        assert!(!is_description_annotation("description", &json!({"type": "string"})));
    }
}
