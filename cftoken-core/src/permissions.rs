//! Permission resolution against the provider's permission catalog.
//!
//! Inputs are matched, per catalog entry and in catalog order, by
//! case-insensitive ID, then normalized name, then normalized alias key. The
//! first hit wins, so two entries sharing a normalized name are not reported
//! as ambiguous: the earlier one is used.

use crate::error::{Result, TokenError};
use crate::types::{PermissionCatalogEntry, PermissionGroupRef};

/// Permission group names used when nothing else supplies permissions.
pub const DEFAULT_PERMISSION_KEYS: &[&str] = &["Zone:Read"];

const SUGGESTION_THRESHOLD: f64 = 0.85;

/// Catalog entries matched for a list of permission inputs, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionMatch {
    pub refs: Vec<PermissionGroupRef>,
    pub entries: Vec<PermissionCatalogEntry>,
}

/// Resolve every input to a catalog entry; fails on the first unresolved input.
pub fn match_permissions<S: AsRef<str>>(
    catalog: &[PermissionCatalogEntry],
    inputs: &[S],
) -> Result<PermissionMatch> {
    if inputs.is_empty() {
        return Err(TokenError::NoPermissionsSpecified);
    }

    let mut matched = PermissionMatch {
        refs: Vec::with_capacity(inputs.len()),
        entries: Vec::with_capacity(inputs.len()),
    };
    for input in inputs {
        let input = input.as_ref();
        let entry = find_entry(catalog, input).ok_or_else(|| TokenError::PermissionNotFound {
            input: input.to_string(),
            suggestion: suggest(catalog, input),
        })?;
        log::debug!("permission {:?} resolved to {} ({})", input, entry.id, entry.display_name());
        matched.refs.push(PermissionGroupRef::from(entry));
        matched.entries.push(entry.clone());
    }
    Ok(matched)
}

fn find_entry<'a>(
    catalog: &'a [PermissionCatalogEntry],
    input: &str,
) -> Option<&'a PermissionCatalogEntry> {
    let normalized = normalize_key(input);
    catalog.iter().find(|entry| {
        entry.id.eq_ignore_ascii_case(input.trim())
            || normalize_key(&entry.name) == normalized
            || (!entry.alias_key.is_empty() && normalize_key(&entry.alias_key) == normalized)
    })
}

/// Lowercase and strip spaces, underscores, hyphens, colons and periods.
///
/// `"Zone:Read"`, `"zone_read"` and `"ZONE-READ"` all normalize to `"zoneread"`.
pub fn normalize_key(s: &str) -> String {
    let stripped: String = s
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-' | ':' | '.'))
        .collect();
    stripped.trim().to_string()
}

fn suggest(catalog: &[PermissionCatalogEntry], input: &str) -> Option<String> {
    let normalized = normalize_key(input);
    catalog
        .iter()
        .map(|entry| {
            let score = strsim::jaro_winkler(&normalize_key(&entry.name), &normalized);
            (score, entry)
        })
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, entry)| entry.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn catalog() -> Vec<PermissionCatalogEntry> {
        vec![
            PermissionCatalogEntry::new("p1", "Zone Read", "zone.read"),
            PermissionCatalogEntry::new("p2", "DNS Write", "dns_records.edit"),
            PermissionCatalogEntry::new("c0ffee", "Cache Purge", ""),
        ]
    }

    #[test]
    fn test_match_by_normalized_name() {
        let got = match_permissions(&catalog(), &["Zone:Read"]).unwrap();
        assert_eq!(got.refs, vec![PermissionGroupRef { id: "p1".into(), name: None }]);
        assert_eq!(got.entries[0].name, "Zone Read");
    }

    #[rstest]
    #[case("P2", "p2")]
    #[case("dns-write", "p2")]
    #[case("DNS_RECORDS.EDIT", "p2")]
    #[case("  zone_read ", "p1")]
    #[case("C0FFEE", "c0ffee")]
    fn test_match_strategies(#[case] input: &str, #[case] want: &str) {
        let got = match_permissions(&catalog(), &[input]).unwrap();
        assert_eq!(got.refs[0].id, want);
    }

    #[test]
    fn test_output_mirrors_input_order() {
        let got = match_permissions(&catalog(), &["Cache Purge", "zone.read", "p2"]).unwrap();
        let ids: Vec<_> = got.refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c0ffee", "p1", "p2"]);
    }

    #[test]
    fn test_repeated_inputs_are_not_deduplicated() {
        let got = match_permissions(&catalog(), &["Zone Read", "zone.read", "p1"]).unwrap();
        let ids: Vec<_> = got.refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p1", "p1"]);
        assert_eq!(got.entries.len(), 3);
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let err = match_permissions::<&str>(&catalog(), &[]).unwrap_err();
        assert!(matches!(err, TokenError::NoPermissionsSpecified));
    }

    #[test]
    fn test_unresolved_input_fails_whole_call() {
        let err = match_permissions(&catalog(), &["Zone:Read", "Workers Admin"]).unwrap_err();
        match err {
            TokenError::PermissionNotFound { input, suggestion } => {
                assert_eq!(input, "Workers Admin");
                assert_eq!(suggestion, None);
            }
            other => panic!("expected PermissionNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_input_suggests_close_name() {
        let err = match_permissions(&catalog(), &["Zone Raed"]).unwrap_err();
        assert!(matches!(
            err,
            TokenError::PermissionNotFound { suggestion: Some(ref s), .. } if s == "Zone Read"
        ));
    }

    #[test]
    fn test_empty_alias_key_never_matches() {
        let catalog = vec![PermissionCatalogEntry::new("p9", "Something", "")];
        assert!(match_permissions(&catalog, &[" - "]).is_err());
    }

    #[test]
    fn test_first_match_wins_on_duplicate_names() {
        let catalog = vec![
            PermissionCatalogEntry::new("first", "Zone Read", ""),
            PermissionCatalogEntry::new("second", "zone-read", ""),
        ];
        let got = match_permissions(&catalog, &["ZONE READ"]).unwrap();
        assert_eq!(got.refs[0].id, "first");
    }

    #[rstest]
    #[case("Zone:Read")]
    #[case("zone_read")]
    #[case("ZONE-READ")]
    #[case("zone.read")]
    fn test_normalize_key_equivalence(#[case] input: &str) {
        assert_eq!(normalize_key(input), "zoneread");
    }

    proptest! {
        #[test]
        fn prop_normalize_key_is_idempotent(s in "\\PC*") {
            let once = normalize_key(&s);
            prop_assert_eq!(normalize_key(&once), once);
        }
    }
}
