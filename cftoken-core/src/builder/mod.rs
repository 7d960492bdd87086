//! Token specification builder.
//!
//! Every field is resolved from, highest precedence first: an explicit
//! override, the zone record, the global defaults and a built-in fallback.
//! Building runs in two phases so callers can skip fetching the permission
//! catalog when a zone template already supplies the policies.

mod precedence;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::cidr;
use crate::error::{Result, TokenError};
use crate::permissions::{match_permissions, DEFAULT_PERMISSION_KEYS};
use crate::template::TemplateVariables;
use crate::types::{
    PermissionCatalogEntry, PolicyDocument, PolicySource, TokenSpecification, ZoneTarget,
};
use crate::zones::{looks_like_zone_id, Defaults, ZoneRecord, ZoneTable};
use precedence::{non_empty, Chain};

/// Resource key prefix for a zone-scoped policy.
pub const ZONE_RESOURCE_PREFIX: &str = "com.cloudflare.api.account.zone.";

/// Token lifetime in hours when neither an override nor the zone sets one.
pub const DEFAULT_TTL_HOURS: i64 = 8;

/// Format of the timestamp appended to token names.
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Values supplied explicitly by the caller, typically from flags.
///
/// `None` means "not given". For `permissions` and `allowed_cidrs`,
/// `Some(vec![])` is an explicit empty override and still takes precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub token_prefix: Option<String>,
    pub zone_id: Option<String>,
    pub zone: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub allowed_cidrs: Option<Vec<String>>,
    pub ttl: Option<Duration>,
    pub variables: TemplateVariables,
}

/// Policies as known before the permission catalog is consulted.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingPolicies {
    /// Rendered from the zone template; used verbatim.
    Rendered(Vec<PolicyDocument>),
    /// Permission inputs still to be matched against the catalog.
    Permissions(Vec<String>),
}

/// Everything except permission matching, resolved and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub name: String,
    pub zone: ZoneTarget,
    pub policies: PendingPolicies,
    /// Empty when IP restriction is disabled.
    pub allowed_cidrs: Vec<String>,
    pub ip_restriction_disabled: bool,
    pub ttl: Duration,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ResolvedRequest {
    /// Whether [`Self::finish`] will look at the catalog.
    pub fn needs_catalog(&self) -> bool {
        matches!(self.policies, PendingPolicies::Permissions(_))
    }

    /// Permission inputs awaiting catalog resolution, if any.
    pub fn permission_inputs(&self) -> &[String] {
        match &self.policies {
            PendingPolicies::Permissions(inputs) => inputs,
            PendingPolicies::Rendered(_) => &[],
        }
    }

    /// Match pending permissions against `catalog` and produce the final
    /// specification. The catalog is ignored for rendered policies.
    pub fn finish(self, catalog: &[PermissionCatalogEntry]) -> Result<TokenSpecification> {
        let (policies, policy_source) = match self.policies {
            PendingPolicies::Rendered(policies) => (policies, PolicySource::Template),
            PendingPolicies::Permissions(inputs) => {
                let matched = match_permissions(catalog, &inputs)?;
                let resources = BTreeMap::from([(
                    format!("{ZONE_RESOURCE_PREFIX}{}", self.zone.id),
                    "*".to_string(),
                )]);
                (
                    vec![PolicyDocument::allow(resources, matched.refs)],
                    PolicySource::Permissions {
                        inputs,
                        matched: matched.entries,
                    },
                )
            }
        };
        if policies.is_empty() {
            return Err(TokenError::NoPolicies);
        }

        Ok(TokenSpecification {
            name: self.name,
            policies,
            expires_at: self.expires_at,
            allowed_cidrs: self.allowed_cidrs,
            created_at: self.created_at,
            zone: self.zone,
            policy_source,
        })
    }
}

/// Resolve and validate everything that does not need the catalog, using
/// the current time as the creation time.
pub fn resolve(overrides: &Overrides, table: &ZoneTable) -> Result<ResolvedRequest> {
    resolve_at(overrides, table, Utc::now())
}

pub fn resolve_at(
    overrides: &Overrides,
    table: &ZoneTable,
    created_at: DateTime<Utc>,
) -> Result<ResolvedRequest> {
    let (zone, record) = select_zone(overrides, table)?;
    let name = token_name(overrides, &zone, created_at)?;
    let record = record.as_ref();
    let policies = pending_policies(overrides, record, &table.defaults, &zone)?;
    let cidrs = allowed_cidrs(overrides, record, &table.defaults)?;

    let ttl = Chain::new("ttl")
        .layer("override", || overrides.ttl)
        .layer("zone ttl", || record.and_then(|r| r.ttl))
        .or_fallback(|| Duration::hours(DEFAULT_TTL_HOURS));
    let expires_at = (ttl > Duration::zero()).then(|| created_at + ttl);

    Ok(ResolvedRequest {
        name,
        zone,
        policies,
        allowed_cidrs: cidrs.cidrs,
        ip_restriction_disabled: cidrs.disabled,
        ttl,
        expires_at,
        created_at,
    })
}

/// Build a complete specification in one step.
pub fn build(
    overrides: &Overrides,
    catalog: &[PermissionCatalogEntry],
    table: &ZoneTable,
) -> Result<TokenSpecification> {
    build_at(overrides, catalog, table, Utc::now())
}

pub fn build_at(
    overrides: &Overrides,
    catalog: &[PermissionCatalogEntry],
    table: &ZoneTable,
    created_at: DateTime<Utc>,
) -> Result<TokenSpecification> {
    resolve_at(overrides, table, created_at)?.finish(catalog)
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn select_zone(
    overrides: &Overrides,
    table: &ZoneTable,
) -> Result<(ZoneTarget, Option<ZoneRecord>)> {
    if let Some(id) = non_blank(overrides.zone_id.as_ref()) {
        return Ok((ZoneTarget { id, name: None }, None));
    }
    let name = non_blank(overrides.zone.as_ref()).ok_or(TokenError::MissingZone)?;

    match table.resolve(&name) {
        Ok(resolved) => Ok((
            ZoneTarget {
                id: resolved.zone_id,
                name: Some(resolved.name),
            },
            resolved.record,
        )),
        Err(TokenError::ZoneNotFound { .. }) if looks_like_zone_id(&name) => {
            log::warn!("zone {name:?} is not configured; treating it as a zone ID");
            Ok((ZoneTarget { id: name, name: None }, None))
        }
        Err(e) => Err(e),
    }
}

fn token_name(
    overrides: &Overrides,
    zone: &ZoneTarget,
    created_at: DateTime<Utc>,
) -> Result<String> {
    let prefix = Chain::new("token prefix")
        .layer("override", || non_blank(overrides.token_prefix.as_ref()))
        .layer("zone name", || zone.name.clone())
        .first_present()
        .ok_or(TokenError::MissingTokenPrefix)?;
    Ok(format!(
        "{prefix}-{}",
        created_at.format(NAME_TIMESTAMP_FORMAT)
    ))
}

fn default_permission_inputs() -> Vec<String> {
    DEFAULT_PERMISSION_KEYS.iter().map(ToString::to_string).collect()
}

fn pending_policies(
    overrides: &Overrides,
    record: Option<&ZoneRecord>,
    defaults: &Defaults,
    zone: &ZoneTarget,
) -> Result<PendingPolicies> {
    if let Some(explicit) = &overrides.permissions {
        let inputs: Vec<String> = explicit
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        return Ok(PendingPolicies::Permissions(if inputs.is_empty() {
            default_permission_inputs()
        } else {
            inputs
        }));
    }

    if let Some(record) = record {
        if let Some(template) = &record.template {
            let mut vars = TemplateVariables::new();
            vars.insert("ZoneID".to_string(), Value::String(zone.id.clone()));
            vars.extend(record.variables.clone());
            vars.extend(overrides.variables.clone());
            log::debug!("rendering policy template with {} variable(s)", vars.len());
            return template.render(&vars).map(PendingPolicies::Rendered);
        }
    }

    let inputs = Chain::new("permissions")
        .layer("zone permissions", || record.and_then(|r| non_empty(&r.permissions)))
        .layer("default_permissions", || non_empty(&defaults.permissions))
        .or_fallback(default_permission_inputs);
    Ok(PendingPolicies::Permissions(inputs))
}

fn allowed_cidrs(
    overrides: &Overrides,
    record: Option<&ZoneRecord>,
    defaults: &Defaults,
) -> Result<cidr::NormalizedCidrs> {
    let raw = Chain::new("allowed CIDRs")
        .layer("override", || overrides.allowed_cidrs.clone())
        .layer("zone allowed_cidrs", || record.and_then(|r| non_empty(&r.allowed_cidrs)))
        .layer("default_allowed_cidrs", || non_empty(&defaults.allowed_cidrs))
        .first_present()
        .unwrap_or_default();

    let normalized = cidr::normalize(&raw)?;
    if normalized.cidrs.is_empty() && !normalized.disabled {
        return Err(TokenError::NoCidrsConfigured);
    }
    Ok(normalized)
}
