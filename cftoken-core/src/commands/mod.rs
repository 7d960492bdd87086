//! Service layer wiring the builder to the permission catalog and token sink.

mod apply;
mod plan;
pub(crate) mod service;

pub use plan::PlanResult;
pub use service::{PermissionCatalog, TokenService, TokenSink};
