//! Apply logic: submit a planned specification to the sink.

use crate::error::{Result, TokenError};
use crate::types::TokenResult;

use super::plan::PlanResult;
use super::service::{PermissionCatalog, TokenService, TokenSink};

impl<C, S> TokenService<C, S>
where
    C: PermissionCatalog,
    S: TokenSink,
{
    /// Create the token described by `plan`. Failures are not retried.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Submission`] wrapping the provider error when the
    /// sink rejects the request.
    pub async fn apply(&self, plan: &PlanResult) -> Result<TokenResult> {
        let spec = &plan.specification;
        log::info!("creating token {} for zone {}", spec.name, spec.zone.id);
        let result = self
            .sink
            .create_token(spec)
            .await
            .map_err(TokenError::Submission)?;
        log::info!("created token {} ({})", result.name, result.id);
        Ok(result)
    }
}
