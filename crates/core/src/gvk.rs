//! Group/Version/Kind helpers.
//!
//! apiVersion is a pure function of `(group, version)`. Parsing goes the other
//! way by splitting on the single `/`: API groups are DNS-like names and may
//! contain dots but never slashes, so `rbac.authorization.k8s.io/v1` always
//! round-trips to the full group.

use serde::{Deserialize, Serialize};

/// Sentinel group for the legacy (empty) API group.
pub const CORE_GROUP: &str = "core";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    /// Build a GVK; an empty group is normalized to [`CORE_GROUP`].
    pub fn new(group: impl AsRef<str>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: normalize_group(group.as_ref()).to_string(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn key(&self) -> String {
        gvk_key(&self.group, &self.version, &self.kind)
    }

    pub fn api_version(&self) -> String {
        api_version(&self.group, &self.version)
    }

    /// Split an `apiVersion` (`v1`, `apps/v1`, `rbac.authorization.k8s.io/v1`).
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Option<Self> {
        let api_version = api_version.trim();
        match api_version.split_once('/') {
            None if !api_version.is_empty() => Some(Self::new(CORE_GROUP, api_version, kind)),
            Some((group, version)) if !group.is_empty() && !version.is_empty() && !version.contains('/') => {
                Some(Self::new(group, version, kind))
            }
            _ => None,
        }
    }

    /// Parse a GVK key: `v1/Pod`, `core/v1/Pod` or `apps/v1/Deployment`.
    pub fn parse_key(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            [version, kind] => Some(Self::new(CORE_GROUP, *version, *kind)),
            [group, version, kind] => Some(Self::new(*group, *version, *kind)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Gvk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.kind)
    }
}

pub fn normalize_group(group: &str) -> &str {
    if group.is_empty() {
        CORE_GROUP
    } else {
        group
    }
}

pub fn api_version(group: &str, version: &str) -> String {
    let group = normalize_group(group);
    if group == CORE_GROUP {
        version.to_string()
    } else {
        format!("{}/{}", group, version)
    }
}

pub fn gvk_key(group: &str, version: &str, kind: &str) -> String {
    format!("{}/{}/{}", normalize_group(group), version, kind)
}

/// `"<kind> <version>"`, with a ` (<group>)` suffix outside the core group.
pub fn display_name(group: &str, version: &str, kind: &str) -> String {
    let group = normalize_group(group);
    if group == CORE_GROUP {
        format!("{} {}", kind, version)
    } else {
        format!("{} {} ({})", kind, version, group)
    }
}
