//! Validate YAML manifests against a resolved schema (feature `jsonschema-validate`).

use anyhow::{anyhow, Context, Result};
use jsonschema::{Draft, JSONSchema};
use kforge_core::ResolvedSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub error: String,
    pub hint: Option<String>,
}

/// Returns human-friendly issues; empty when the manifest conforms.
pub fn validate_yaml(schema: &ResolvedSchema, yaml: &str) -> Result<Vec<ValidationIssue>> {
    let doc: serde_json::Value = match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(v) => serde_json::to_value(v).context("converting YAML to JSON")?,
        Err(e) => {
            return Ok(vec![ValidationIssue {
                path: String::new(),
                error: format!("YAML parse error: {}", e),
                hint: Some("check indentation and syntax".into()),
            }])
        }
    };
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| anyhow!("compiling resolved schema: {}", e))?;
    let mut issues = Vec::new();
    if let Err(errors) = compiled.validate(&doc) {
        for err in errors {
            let error = err.to_string();
            let hint = if error.contains("required property") {
                Some("missing required field".into())
            } else if error.contains("is not of type") {
                Some("mismatched type".into())
            } else if error.contains("is not one of") {
                Some("value not in allowed set".into())
            } else {
                None
            };
            issues.push(ValidationIssue { path: err.instance_path.to_string(), error, hint });
        }
    }
    Ok(issues)
}
