//! Human-readable rendering of command results.

use std::io::Write;

use anyhow::Result;
use cftoken_cloudflare::{PermissionGroup, TokenInspection};
use cftoken_core::{PermissionCatalogEntry, PlanResult, PolicySource, TokenResult, ZoneListing};
use chrono::{DateTime, SecondsFormat, Utc};

const COLUMN_PADDING: usize = 2;

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn join_or_default(values: &[String], fallback: &str) -> String {
    if values.is_empty() {
        fallback.to_string()
    } else {
        values.join(", ")
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `display (id, key: k)`, omitting the key when it is empty or already shown.
fn group_label(display: &str, id: &str, key: &str) -> String {
    if !key.is_empty() && key != display {
        format!("{display} ({id}, key: {key})")
    } else {
        format!("{display} ({id})")
    }
}

pub(crate) fn print_token_result(
    out: &mut impl Write,
    result: &TokenResult,
    plan: &PlanResult,
) -> Result<()> {
    let spec = &plan.specification;
    writeln!(out, "Token created successfully.")?;
    writeln!(out, "Name:   {}", or_default(&result.name, &spec.name))?;
    writeln!(out, "ID:     {}", result.id)?;
    writeln!(
        out,
        "Value:  {}",
        or_default(result.value.as_deref().unwrap_or_default(), "<redacted by API>")
    )?;
    writeln!(
        out,
        "Status: {}",
        or_default(result.status.as_deref().unwrap_or_default(), "<unknown>")
    )?;
    match &spec.zone.name {
        Some(name) => writeln!(out, "Zone ID: {} ({name})", spec.zone.id)?,
        None => writeln!(out, "Zone ID: {}", spec.zone.id)?,
    }
    let expires = match (&result.expires_on, &spec.expires_at) {
        (Some(at), _) => timestamp(at),
        (None, Some(_)) => "<not returned>".to_string(),
        (None, None) => "none".to_string(),
    };
    writeln!(out, "Expires: {expires}")?;
    writeln!(out, "Allowed CIDRs: {}", allowed_cidrs(plan))?;
    Ok(())
}

fn allowed_cidrs(plan: &PlanResult) -> String {
    if plan.ip_restriction_disabled {
        "none (IP restriction disabled)".to_string()
    } else {
        join_or_default(&plan.specification.allowed_cidrs, "none")
    }
}

pub(crate) fn print_dry_run(out: &mut impl Write, plan: &PlanResult) -> Result<()> {
    let spec = &plan.specification;
    writeln!(out, "DRY RUN: no changes made.")?;
    writeln!(out, "Token would be created with:")?;
    writeln!(out, "  Name: {}", spec.name)?;
    match &spec.zone.name {
        Some(name) => writeln!(out, "  Zone: {name} ({})", spec.zone.id)?,
        None => writeln!(out, "  Zone ID: {}", spec.zone.id)?,
    }
    match &spec.expires_at {
        Some(at) => writeln!(out, "  Expires: {}", timestamp(at))?,
        None => writeln!(out, "  Expires: none")?,
    }
    writeln!(out, "  Allowed CIDRs: {}", allowed_cidrs(plan))?;

    match &spec.policy_source {
        PolicySource::Permissions { inputs, matched } => {
            writeln!(out, "  Permission inputs: {}", join_or_default(inputs, "none"))?;
            writeln!(out, "  Permission groups:")?;
            write_catalog_entries(out, matched)?;
        }
        PolicySource::Template => {
            writeln!(out, "  Permission inputs: none (zone template)")?;
            writeln!(out, "  Permission groups:")?;
            let mut wrote = false;
            for group in spec.policies.iter().flat_map(|p| &p.permission_groups) {
                let display = group.name.as_deref().unwrap_or(&group.id);
                writeln!(out, "    - {}", group_label(display, &group.id, ""))?;
                wrote = true;
            }
            if !wrote {
                writeln!(out, "    (none)")?;
            }
        }
    }

    writeln!(out, "  Resources:")?;
    let mut wrote = false;
    for policy in &spec.policies {
        for (resource, scope) in &policy.resources {
            writeln!(out, "    - {resource} -> {scope}")?;
            wrote = true;
        }
    }
    if !wrote {
        writeln!(out, "    (none)")?;
    }
    Ok(())
}

fn write_catalog_entries(out: &mut impl Write, entries: &[PermissionCatalogEntry]) -> Result<()> {
    if entries.is_empty() {
        writeln!(out, "    (none)")?;
    }
    for entry in entries {
        let label = group_label(entry.display_name(), &entry.id, &entry.alias_key);
        writeln!(out, "    - {label}")?;
    }
    Ok(())
}

pub(crate) fn print_inspection(out: &mut impl Write, desc: &TokenInspection) -> Result<()> {
    writeln!(out, "Token details:")?;
    writeln!(out, "ID: {}", or_default(&desc.id, "<unknown>"))?;
    writeln!(out, "Name: {}", or_default(&desc.name, "<unspecified>"))?;
    writeln!(out, "Status: {}", or_default(&desc.status, "<unknown>"))?;
    match &desc.expires_on {
        Some(at) => writeln!(out, "Expires: {}", timestamp(at))?,
        None => writeln!(out, "Expires: none")?,
    }
    if let Some(at) = &desc.not_before {
        writeln!(out, "Not Before: {}", timestamp(at))?;
    }
    writeln!(out, "Allowed CIDRs: {}", join_or_default(&desc.allowed_cidrs, "none"))?;
    writeln!(out, "Denied CIDRs: {}", join_or_default(&desc.denied_cidrs, "none"))?;
    if desc.policies.is_empty() {
        writeln!(out, "Policies: none")?;
        return Ok(());
    }

    writeln!(out, "Policies:")?;
    for (idx, policy) in desc.policies.iter().enumerate() {
        writeln!(out, "  {}. Effect: {}", idx + 1, or_default(&policy.effect, "<unknown>"))?;
        writeln!(out, "     Resources: {}", join_or_default(&policy.resources, "none"))?;
        if policy.permission_groups.is_empty() {
            writeln!(out, "     Permission Groups: none")?;
            continue;
        }
        writeln!(out, "     Permission Groups:")?;
        for group in &policy.permission_groups {
            let label = group_label(group.display_name(), &group.id, &group.key);
            writeln!(out, "       - {label}")?;
        }
    }
    Ok(())
}

pub(crate) fn print_permission_groups(out: &mut impl Write, groups: &[PermissionGroup]) -> Result<()> {
    for group in groups {
        writeln!(out, "{}\t{}", group.id, group.name)?;
        let description = group.description();
        if !description.is_empty() {
            writeln!(out, "    {description}")?;
        }
        if !group.meta.key.is_empty() {
            writeln!(out, "    key: {}", group.meta.key)?;
        }
    }
    Ok(())
}

/// Aligned `ZONE ID SOURCE` table.
pub(crate) fn print_zones(out: &mut impl Write, zones: &[ZoneListing]) -> Result<()> {
    let rows: Vec<[String; 3]> = zones
        .iter()
        .map(|z| [z.name.clone(), z.zone_id.clone(), z.source.to_string()])
        .collect();
    let header = ["ZONE".to_string(), "ID".to_string(), "SOURCE".to_string()];

    let width = |col: usize| {
        std::iter::once(&header)
            .chain(&rows)
            .map(|row| row[col].chars().count())
            .max()
            .unwrap_or(0)
            + COLUMN_PADDING
    };
    let (name_width, id_width) = (width(0), width(1));

    for [name, id, source] in std::iter::once(&header).chain(&rows) {
        writeln!(out, "{name:<name_width$}{id:<id_width$}{source}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cftoken_cloudflare::{PermissionGroupMeta, PermissionGroupSummary, TokenPolicyInspection};
    use cftoken_core::{PolicyDocument, PermissionGroupRef, TokenSpecification, ZoneSource, ZoneTarget};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn plan(source: PolicySource, policies: Vec<PolicyDocument>) -> PlanResult {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap();
        PlanResult {
            specification: TokenSpecification {
                name: "dev-20240102T150405Z".into(),
                policies,
                expires_at: Some(created_at + Duration::hours(8)),
                allowed_cidrs: vec!["10.0.0.1/32".into(), "10.0.0.2/32".into()],
                created_at,
                zone: ZoneTarget {
                    id: "zone-1".into(),
                    name: Some("example.com".into()),
                },
                policy_source: source,
            },
            ip_restriction_disabled: false,
            ttl: Duration::hours(8),
        }
    }

    fn zone_policy() -> PolicyDocument {
        PolicyDocument::allow(
            BTreeMap::from([("com.cloudflare.api.account.zone.zone-1".into(), "*".into())]),
            vec![PermissionGroupRef { id: "p1".into(), name: None }],
        )
    }

    #[test]
    fn test_dry_run_with_matched_permissions() {
        let plan = plan(
            PolicySource::Permissions {
                inputs: vec!["Zone:Read".into()],
                matched: vec![PermissionCatalogEntry::new("p1", "Zone Read", "zone.read")],
            },
            vec![zone_policy()],
        );
        let text = render(|out| print_dry_run(out, &plan));
        assert_eq!(
            text,
            "DRY RUN: no changes made.\n\
             Token would be created with:\n  \
             Name: dev-20240102T150405Z\n  \
             Zone: example.com (zone-1)\n  \
             Expires: 2024-01-02T23:04:05Z\n  \
             Allowed CIDRs: 10.0.0.1/32, 10.0.0.2/32\n  \
             Permission inputs: Zone:Read\n  \
             Permission groups:\n    \
             - Zone Read (p1, key: zone.read)\n  \
             Resources:\n    \
             - com.cloudflare.api.account.zone.zone-1 -> *\n"
        );
    }

    #[test]
    fn test_dry_run_from_template_without_expiry() {
        let mut plan = plan(PolicySource::Template, vec![zone_policy()]);
        plan.specification.expires_at = None;
        plan.specification.zone.name = None;
        plan.specification.allowed_cidrs.clear();
        plan.ip_restriction_disabled = true;

        let text = render(|out| print_dry_run(out, &plan));
        assert!(text.contains("  Zone ID: zone-1\n"));
        assert!(text.contains("  Expires: none\n"));
        assert!(text.contains("  Allowed CIDRs: none (IP restriction disabled)\n"));
        assert!(text.contains("  Permission inputs: none (zone template)\n"));
        assert!(text.contains("    - p1 (p1)\n"));
    }

    #[test]
    fn test_token_result_fallbacks() {
        let plan = plan(PolicySource::Template, vec![zone_policy()]);
        let result = TokenResult {
            id: "t1".into(),
            name: "dev-20240102T150405Z".into(),
            ..TokenResult::default()
        };
        let text = render(|out| print_token_result(out, &result, &plan));
        assert_eq!(
            text,
            "Token created successfully.\n\
             Name:   dev-20240102T150405Z\n\
             ID:     t1\n\
             Value:  <redacted by API>\n\
             Status: <unknown>\n\
             Zone ID: zone-1 (example.com)\n\
             Expires: <not returned>\n\
             Allowed CIDRs: 10.0.0.1/32, 10.0.0.2/32\n"
        );
    }

    #[test]
    fn test_inspection_lists_policies() {
        let desc = TokenInspection {
            id: "t1".into(),
            status: "active".into(),
            policies: vec![TokenPolicyInspection {
                effect: "allow".into(),
                permission_groups: vec![
                    PermissionGroupSummary { id: "p1".into(), name: "Zone Read".into(), key: "zone.read".into() },
                    PermissionGroupSummary { id: "p2".into(), name: String::new(), key: "dns.edit".into() },
                ],
                resources: vec!["com.cloudflare.api.account.zone.z1=*".into()],
            }],
            ..TokenInspection::default()
        };
        let text = render(|out| print_inspection(out, &desc));
        assert_eq!(
            text,
            "Token details:\n\
             ID: t1\n\
             Name: <unspecified>\n\
             Status: active\n\
             Expires: none\n\
             Allowed CIDRs: none\n\
             Denied CIDRs: none\n\
             Policies:\n  \
             1. Effect: allow\n     \
             Resources: com.cloudflare.api.account.zone.z1=*\n     \
             Permission Groups:\n       \
             - Zone Read (p1, key: zone.read)\n       \
             - dns.edit (p2)\n"
        );
    }

    #[test]
    fn test_inspection_without_policies() {
        let text = render(|out| print_inspection(out, &TokenInspection::default()));
        assert!(text.ends_with("Policies: none\n"));
    }

    #[test]
    fn test_permission_groups_listing() {
        let groups = vec![
            PermissionGroup {
                id: "p1".into(),
                name: "Zone Read".into(),
                description: String::new(),
                scopes: Vec::new(),
                meta: PermissionGroupMeta {
                    key: "zone.read".into(),
                    description: "Read zones".into(),
                    ..PermissionGroupMeta::default()
                },
            },
            PermissionGroup {
                id: "p2".into(),
                name: "Bare".into(),
                description: String::new(),
                scopes: Vec::new(),
                meta: PermissionGroupMeta::default(),
            },
        ];
        let text = render(|out| print_permission_groups(out, &groups));
        assert_eq!(text, "p1\tZone Read\n    Read zones\n    key: zone.read\np2\tBare\n");
    }

    #[test]
    fn test_zones_table_is_aligned() {
        let zones = vec![
            ZoneListing {
                name: "example.com".into(),
                zone_id: "abc".into(),
                source: ZoneSource::Config,
            },
            ZoneListing {
                name: "a.io".into(),
                zone_id: "0123456789".into(),
                source: ZoneSource::ZonesFile,
            },
        ];
        let text = render(|out| print_zones(out, &zones));
        assert_eq!(
            text,
            "ZONE         ID          SOURCE\n\
             example.com  abc         config\n\
             a.io         0123456789  zones-file\n"
        );
    }
}
