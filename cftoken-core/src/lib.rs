//! Core of cftoken: turns command-line overrides, per-zone configuration and
//! global defaults into a validated, provider-agnostic token specification:
//! - CIDR allow-list normalization
//! - Permission matching against a provider catalog
//! - Policy template rendering
//! - Zone lookup and configuration loading
//!

pub mod builder;
pub mod cidr;
pub mod commands;
pub mod config;
mod error;
pub mod permissions;
pub mod template;
mod types;
pub mod zones;

// Re-exports for a small, focused public API
pub use builder::{build, resolve, Overrides, PendingPolicies, ResolvedRequest};
pub use commands::{PermissionCatalog, PlanResult, TokenService, TokenSink};
pub use config::{ConfigError, ConfigLoader, ZoneListing, ZoneSource};
pub use error::{ProviderError, Result, TokenError};
pub use template::{TemplateRef, TemplateVariables};
pub use types::{
    Effect, PermissionCatalogEntry, PermissionGroupRef, PolicyDocument, PolicySource,
    TokenResult, TokenSpecification, ZoneTarget,
};
pub use zones::{Defaults, ZoneEntry, ZoneRecord, ZoneTable};
