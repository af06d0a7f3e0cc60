//! kforge core types: resource metadata, GVK helpers and schema errors.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod gvk;

pub use gvk::{api_version, display_name, gvk_key, normalize_group, Gvk, CORE_GROUP};

/// A schema node with every `$ref` inlined and descriptions stripped.
pub type ResolvedSchema = serde_json::Value;

/// Per-GVK metadata extracted from a definitions document.
///
/// There is no `apiVersion` field; it is derived from `(group, version)`
/// through [`ResourceMetadata::api_version`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    /// `<group>/<version>/<kind>`, group normalized to `core` for the legacy API group.
    pub key: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Origin tag, e.g. `kubernetes` or `cluster-crds`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Key of the backing node in the definitions document.
    pub definition_key: String,
}

impl ResourceMetadata {
    pub fn new(
        gvk: Gvk,
        definition_key: impl Into<String>,
        description: Option<String>,
        source: Option<String>,
    ) -> Self {
        Self {
            key: gvk.key(),
            display_name: display_name(&gvk.group, &gvk.version, &gvk.kind),
            group: gvk.group,
            version: gvk.version,
            kind: gvk.kind,
            description,
            source,
            definition_key: definition_key.into(),
        }
    }

    pub fn api_version(&self) -> String {
        api_version(&self.group, &self.version)
    }

    pub fn gvk(&self) -> Gvk {
        Gvk::new(self.group.as_str(), self.version.as_str(), self.kind.as_str())
    }

    pub fn is_core(&self) -> bool {
        self.group == CORE_GROUP
    }
}

/// Schema substituted for circular, missing or too-deep references.
pub fn open_object_schema() -> serde_json::Map<String, serde_json::Value> {
    let mut m = serde_json::Map::new();
    m.insert("type".into(), serde_json::Value::String("object".into()));
    m.insert("additionalProperties".into(), serde_json::Value::Bool(true));
    m
}

/// How a caller should react to a propagated error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Reloading a fresh document may fix it.
    Retryable,
    /// The document itself is unusable.
    Terminal,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::MalformedInput(_) | SchemaError::Json(_) => ErrorKind::Terminal,
            SchemaError::UnresolvedReference(_) | SchemaError::Io(_) => ErrorKind::Retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}
