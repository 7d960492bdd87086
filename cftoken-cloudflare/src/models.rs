//! Wire types for the Cloudflare `/user/tokens` API.

use std::collections::BTreeMap;
use std::fmt;

use cftoken_core::{PermissionCatalogEntry, PolicyDocument};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard Cloudflare response wrapper.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub(crate) success: Option<bool>,
    #[serde(default)]
    pub(crate) errors: Vec<ApiMessage>,
    pub(crate) result: Option<T>,
}

/// An error or informational message from the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ApiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A permission group that can be attached to an API token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub meta: PermissionGroupMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupMeta {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

impl PermissionGroup {
    /// Group description, falling back to the metadata description.
    pub fn description(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.meta.description
        } else {
            &self.description
        }
    }
}

impl From<&PermissionGroup> for PermissionCatalogEntry {
    fn from(group: &PermissionGroup) -> Self {
        Self::new(group.id.clone(), group.name.clone(), group.meta.key.clone())
    }
}

/// Body of `POST /user/tokens`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateTokenRequest<'a> {
    pub(crate) name: &'a str,
    pub(crate) policies: &'a [PolicyDocument],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) expires_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) condition: Option<RequestCondition<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestCondition<'a> {
    pub(crate) request_ip: RequestIpCondition<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestIpCondition<'a> {
    #[serde(rename = "in")]
    pub(crate) allowed: &'a [String],
}

/// Cloudflare expects whole-second RFC 3339 timestamps in UTC.
pub(crate) fn api_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Result of `GET /user/tokens/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenVerification {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

/// Token as returned by `GET /user/tokens/{id}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiToken {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) condition: Option<ApiCondition>,
    #[serde(default)]
    pub(crate) policies: Vec<ApiPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiCondition {
    #[serde(default)]
    pub(crate) request_ip: Option<ApiRequestIp>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiRequestIp {
    #[serde(default, rename = "in")]
    pub(crate) allowed: Vec<String>,
    #[serde(default)]
    pub(crate) not_in: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiPolicy {
    #[serde(default)]
    pub(crate) effect: String,
    #[serde(default)]
    pub(crate) resources: BTreeMap<String, Value>,
    #[serde(default)]
    pub(crate) permission_groups: Vec<ApiPermissionGroup>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiPermissionGroup {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) meta: Option<PermissionGroupMeta>,
}

/// Summary of a token's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenInspection {
    pub id: String,
    pub name: String,
    pub status: String,
    pub expires_on: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    /// Sorted.
    pub allowed_cidrs: Vec<String>,
    /// Sorted.
    pub denied_cidrs: Vec<String>,
    pub policies: Vec<TokenPolicyInspection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenPolicyInspection {
    pub effect: String,
    pub permission_groups: Vec<PermissionGroupSummary>,
    /// Flattened `key=value` pairs, sorted.
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionGroupSummary {
    pub id: String,
    pub name: String,
    pub key: String,
}

impl PermissionGroupSummary {
    /// Name, else key, else ID.
    pub fn display_name(&self) -> &str {
        [&self.name, &self.key, &self.id]
            .into_iter()
            .find(|v| !v.trim().is_empty())
            .map_or("", String::as_str)
    }
}

impl From<ApiToken> for TokenInspection {
    fn from(token: ApiToken) -> Self {
        let request_ip = token
            .condition
            .and_then(|c| c.request_ip)
            .unwrap_or_default();
        let mut allowed_cidrs = request_ip.allowed;
        let mut denied_cidrs = request_ip.not_in;
        allowed_cidrs.sort();
        denied_cidrs.sort();

        let policies = token
            .policies
            .into_iter()
            .map(|policy| {
                let mut resources = flatten_resources(&policy.resources);
                resources.sort();
                TokenPolicyInspection {
                    effect: policy.effect,
                    permission_groups: policy
                        .permission_groups
                        .into_iter()
                        .map(|group| PermissionGroupSummary {
                            id: group.id,
                            name: group.name,
                            key: group.meta.map(|m| m.key).unwrap_or_default(),
                        })
                        .collect(),
                    resources,
                }
            })
            .collect();

        Self {
            id: token.id,
            name: token.name,
            status: token.status,
            expires_on: token.expires_on,
            not_before: token.not_before,
            allowed_cidrs,
            denied_cidrs,
            policies,
        }
    }
}

/// Flatten string or nested-object resource maps into `key=value` entries.
fn flatten_resources(resources: &BTreeMap<String, Value>) -> Vec<String> {
    let mut out = Vec::new();
    for (key, value) in resources {
        match value {
            Value::Object(nested) if nested.is_empty() => out.push(key.clone()),
            Value::Object(nested) => {
                for (inner, value) in nested {
                    out.push(format!("{key}.{inner}={}", scalar(value)));
                }
            }
            value => {
                let value = scalar(value);
                if value.is_empty() {
                    out.push(key.clone());
                } else {
                    out.push(format!("{key}={value}"));
                }
            }
        }
    }
    out
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_catalog_entry_uses_meta_key_as_alias() {
        let group: PermissionGroup = serde_json::from_value(json!({
            "id": "p1",
            "name": "Zone Read",
            "scopes": ["com.cloudflare.api.account.zone"],
            "meta": {"key": "zone.read", "description": "Read zones"}
        }))
        .unwrap();
        assert_eq!(
            PermissionCatalogEntry::from(&group),
            PermissionCatalogEntry::new("p1", "Zone Read", "zone.read")
        );
        assert_eq!(group.description(), "Read zones");
    }

    #[test]
    fn test_api_timestamp_is_whole_seconds_utc() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 23, 4, 5).unwrap();
        assert_eq!(api_timestamp(&at), "2024-01-02T23:04:05Z");
    }

    #[test]
    fn test_token_inspection_sorts_and_flattens() {
        let token: ApiToken = serde_json::from_value(json!({
            "id": "t1",
            "name": "dev-20240102T150405Z",
            "status": "active",
            "expires_on": "2024-01-02T23:04:05Z",
            "condition": {"request_ip": {"in": ["10.0.0.2/32", "10.0.0.1/32"], "not_in": []}},
            "policies": [{
                "id": "pol-1",
                "effect": "allow",
                "resources": {
                    "com.cloudflare.api.account.zone.z1": "*",
                    "com.cloudflare.api.account.a1": {"com.cloudflare.api.account.zone.*": "*"},
                    "com.cloudflare.api.user.u1": ""
                },
                "permission_groups": [{"id": "p1", "name": "Zone Read", "meta": {"key": "zone.read"}}]
            }]
        }))
        .unwrap();

        let inspection = TokenInspection::from(token);
        assert_eq!(inspection.allowed_cidrs, vec!["10.0.0.1/32", "10.0.0.2/32"]);
        assert!(inspection.denied_cidrs.is_empty());
        assert_eq!(inspection.not_before, None);
        assert_eq!(
            inspection.policies[0].resources,
            vec![
                "com.cloudflare.api.account.a1.com.cloudflare.api.account.zone.*=*",
                "com.cloudflare.api.account.zone.z1=*",
                "com.cloudflare.api.user.u1",
            ]
        );
        assert_eq!(inspection.policies[0].permission_groups[0].key, "zone.read");
    }

    #[test]
    fn test_inspection_without_condition() {
        let token: ApiToken = serde_json::from_value(json!({"id": "t2"})).unwrap();
        let inspection = TokenInspection::from(token);
        assert!(inspection.allowed_cidrs.is_empty());
        assert!(inspection.policies.is_empty());
    }

    #[test]
    fn test_summary_display_name_fallbacks() {
        let summary = PermissionGroupSummary { id: "p1".into(), name: String::new(), key: "zone.read".into() };
        assert_eq!(summary.display_name(), "zone.read");
    }
}
