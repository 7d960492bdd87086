//! Data model shared by the resolution engine and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A provider-defined permission group that can be attached to a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCatalogEntry {
    pub id: String,
    pub name: String,
    /// Machine-friendly key such as `zone.read`; may be empty.
    #[serde(default)]
    pub alias_key: String,
}

impl PermissionCatalogEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>, alias_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            alias_key: alias_key.into(),
        }
    }

    /// Human-readable label: name, else alias key, else id.
    pub fn display_name(&self) -> &str {
        [&self.name, &self.alias_key, &self.id]
            .into_iter()
            .find(|v| !v.trim().is_empty())
            .map_or("", String::as_str)
    }
}

/// Reference to a permission group inside a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&PermissionCatalogEntry> for PermissionGroupRef {
    fn from(entry: &PermissionCatalogEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

/// An allow/deny rule pairing resource scopes with permission groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub effect: Effect,
    #[serde(deserialize_with = "deserialize_resources")]
    pub resources: BTreeMap<String, String>,
    pub permission_groups: Vec<PermissionGroupRef>,
}

impl PolicyDocument {
    /// Allow policy granting `groups` on every resource in `resources`.
    pub fn allow(resources: BTreeMap<String, String>, groups: Vec<PermissionGroupRef>) -> Self {
        Self {
            id: None,
            effect: Effect::Allow,
            resources,
            permission_groups: groups,
        }
    }
}

// Templates may emit non-string resource values; those are stringified.
fn deserialize_resources<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

/// The zone a token specification was resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneTarget {
    pub id: String,
    /// Configured zone name, absent when the zone was given as a raw ID.
    pub name: Option<String>,
}

/// Where the policies of a specification came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySource {
    /// Rendered from a zone template.
    Template,
    /// Synthesized from matched permission groups.
    Permissions {
        inputs: Vec<String>,
        matched: Vec<PermissionCatalogEntry>,
    },
}

/// Fully-resolved request describing a token to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSpecification {
    pub name: String,
    pub policies: Vec<PolicyDocument>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Empty when IP restriction is disabled.
    pub allowed_cidrs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub zone: ZoneTarget,
    pub policy_source: PolicySource,
}

/// Subset of the provider response to a token creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Secret value; only returned once by the provider.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
}
