//! Token service and the provider seams it depends on.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{PermissionCatalogEntry, TokenResult, TokenSpecification};

/// Source of the permission groups a token may be granted.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    async fn permission_catalog(&self) -> Result<Vec<PermissionCatalogEntry>, ProviderError>;
}

/// Destination for finished token specifications.
#[async_trait]
pub trait TokenSink: Send + Sync {
    async fn create_token(&self, spec: &TokenSpecification) -> Result<TokenResult, ProviderError>;
}

/// Plans and creates tokens against a catalog and a sink.
///
/// The same provider client usually implements both traits.
pub struct TokenService<C, S> {
    pub(crate) catalog: C,
    pub(crate) sink: S,
}

impl<C, S> TokenService<C, S>
where
    C: PermissionCatalog,
    S: TokenSink,
{
    /// Service over `catalog` and `sink`. Nothing is fetched until
    /// [`TokenService::plan`] runs, so construction cannot fail.
    pub fn new(catalog: C, sink: S) -> Self {
        Self { catalog, sink }
    }
}
