//! Thin Cloudflare API v4 client used by cftoken.
//!
//! Implements the [`PermissionCatalog`](cftoken_core::PermissionCatalog) and
//! [`TokenSink`](cftoken_core::TokenSink) seams of the core crate. Requests
//! are never retried.

mod client;
mod error;
mod models;

pub use client::{
    CloudflareClient, CloudflareClientBuilder, DEFAULT_BASE_URL, DEFAULT_TIMEOUT,
    DEFAULT_USER_AGENT,
};
pub use error::CloudflareError;
pub use models::{
    ApiMessage, PermissionGroup, PermissionGroupMeta, PermissionGroupSummary, TokenInspection,
    TokenPolicyInspection, TokenVerification,
};
