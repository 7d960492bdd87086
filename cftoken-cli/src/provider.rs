//! Provider adapter that tolerates a missing API token.

use async_trait::async_trait;
use cftoken_cloudflare::CloudflareClient;
use cftoken_core::{
    PermissionCatalog, PermissionCatalogEntry, ProviderError, TokenResult, TokenSink,
    TokenSpecification,
};

pub(crate) const MISSING_TOKEN: &str =
    "missing API token: export CLOUDFLARE_API_TOKEN before running this command";

/// Wraps an optional client so template-only dry runs work offline.
///
/// Without a client every provider call fails with [`MISSING_TOKEN`].
#[derive(Clone)]
pub(crate) struct Provider(Option<CloudflareClient>);

impl Provider {
    pub(crate) fn new(client: Option<CloudflareClient>) -> Self {
        Self(client)
    }

    fn client(&self) -> Result<&CloudflareClient, ProviderError> {
        self.0.as_ref().ok_or_else(|| MISSING_TOKEN.into())
    }
}

#[async_trait]
impl PermissionCatalog for Provider {
    async fn permission_catalog(&self) -> Result<Vec<PermissionCatalogEntry>, ProviderError> {
        self.client()?.permission_catalog().await
    }
}

#[async_trait]
impl TokenSink for Provider {
    async fn create_token(&self, spec: &TokenSpecification) -> Result<TokenResult, ProviderError> {
        TokenSink::create_token(self.client()?, spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_catalog_reports_missing_token() {
        let err = Provider::new(None).permission_catalog().await.unwrap_err();
        assert_eq!(err.to_string(), MISSING_TOKEN);
    }
}
