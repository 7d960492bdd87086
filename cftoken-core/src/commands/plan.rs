//! Plan creation: every resolution step, no token creation.

use chrono::Duration;
use serde::Serialize;

use crate::builder::{self, Overrides};
use crate::error::{Result, TokenError};
use crate::types::TokenSpecification;
use crate::zones::ZoneTable;

use super::service::{PermissionCatalog, TokenService, TokenSink};

/// A validated token specification, ready to be applied or previewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanResult {
    pub specification: TokenSpecification,
    /// True when the allow-list contained the disabling sentinel.
    pub ip_restriction_disabled: bool,
    #[serde(skip)]
    pub ttl: Duration,
}

impl<C, S> TokenService<C, S>
where
    C: PermissionCatalog,
    S: TokenSink,
{
    /// Resolve `overrides` against `table`, fetching the permission catalog
    /// only when the policies are not supplied by a zone template.
    ///
    /// The returned plan holds the complete token specification. Nothing is
    /// created until the plan is passed to [`TokenService::apply`].
    ///
    /// # Errors
    ///
    /// - [`TokenError::MissingZone`], [`TokenError::ZoneNotFound`] or
    ///   [`TokenError::MissingTokenPrefix`] when the request names no usable zone.
    /// - [`TokenError::Catalog`] when the catalog fetch fails.
    /// - [`TokenError::PermissionNotFound`] for names missing from the catalog.
    /// - [`TokenError::MalformedCidr`] or [`TokenError::NoCidrsConfigured`] for
    ///   unusable CIDR lists.
    /// - Any template error raised while rendering zone policies.
    pub async fn plan(&self, overrides: &Overrides, table: &ZoneTable) -> Result<PlanResult> {
        let request = builder::resolve(overrides, table)?;

        let catalog = if request.needs_catalog() {
            log::info!("fetching permission catalog");
            self.catalog
                .permission_catalog()
                .await
                .map_err(TokenError::Catalog)?
        } else {
            log::debug!("policies rendered from zone template; skipping catalog fetch");
            Vec::new()
        };

        let ip_restriction_disabled = request.ip_restriction_disabled;
        let ttl = request.ttl;
        let specification = request.finish(&catalog)?;
        Ok(PlanResult {
            specification,
            ip_restriction_disabled,
            ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::service::tests::{FakeCatalog, RecordingSink};
    use crate::template::TemplateRef;
    use crate::types::PolicySource;
    use crate::zones::{Defaults, ZoneEntry, ZoneRecord};

    fn table() -> ZoneTable {
        let mut table = ZoneTable {
            defaults: Defaults {
                permissions: vec!["Zone:Read".into()],
                allowed_cidrs: vec!["10.0.0.1/32".into()],
            },
            ..ZoneTable::default()
        };
        table.insert("example.com", ZoneEntry::Simple("zone-1".into()));
        table.insert(
            "tpl.example.com",
            ZoneEntry::Extended(ZoneRecord {
                zone_id: "zone-2".into(),
                template: Some(TemplateRef::Inline(
                    r#"[{"resources": {"r": "*"}, "permission_groups": [{"id": "x"}]}]"#.into(),
                )),
                inherit_defaults: true,
                ..ZoneRecord::default()
            }),
        );
        table
    }

    fn zone(name: &str) -> Overrides {
        Overrides {
            zone: Some(name.into()),
            ..Overrides::default()
        }
    }

    #[tokio::test]
    async fn test_plan_fetches_catalog_for_permissions() {
        let service = TokenService::new(FakeCatalog::default(), RecordingSink::default());
        let plan = service.plan(&zone("example.com"), &table()).await.unwrap();

        assert_eq!(service.catalog.calls(), 1);
        assert_eq!(plan.specification.policies[0].permission_groups[0].id, "p1");
        assert!(!plan.ip_restriction_disabled);
        assert_eq!(plan.ttl, Duration::hours(8));
        assert!(service.sink.created().is_empty());
    }

    #[tokio::test]
    async fn test_plan_skips_catalog_for_templates() {
        let service = TokenService::new(FakeCatalog::failing(), RecordingSink::default());
        let plan = service.plan(&zone("tpl.example.com"), &table()).await.unwrap();

        assert_eq!(service.catalog.calls(), 0);
        assert_eq!(plan.specification.policy_source, PolicySource::Template);
    }

    #[tokio::test]
    async fn test_catalog_failure_surfaces_verbatim() {
        let service = TokenService::new(FakeCatalog::failing(), RecordingSink::default());
        let err = service.plan(&zone("example.com"), &table()).await.unwrap_err();
        assert!(matches!(err, TokenError::Catalog(_)));
        assert!(err.to_string().contains("catalog unavailable"), "{err}");
    }

    #[tokio::test]
    async fn test_validation_errors_precede_catalog_fetch() {
        let service = TokenService::new(FakeCatalog::default(), RecordingSink::default());
        let overrides = Overrides {
            allowed_cidrs: Some(vec!["nope".into()]),
            ..zone("example.com")
        };
        let err = service.plan(&overrides, &table()).await.unwrap_err();
        assert!(matches!(err, TokenError::MalformedCidr { .. }));
        assert_eq!(service.catalog.calls(), 0);
    }
}
