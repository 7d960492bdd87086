//! Error types for token specification building.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Error returned by the collaborators that fetch the permission catalog or
/// submit the finished token request.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while resolving a token specification.
///
/// Every variant is fatal: the core never retries and never substitutes a
/// default after validation fails.
#[derive(Debug, Error)]
pub enum TokenError {
    /// An allow-list entry is not a valid IPv4 or IPv6 CIDR.
    #[error("invalid CIDR {literal:?}: {reason}")]
    MalformedCidr { literal: String, reason: String },

    /// Permission resolution was called without any inputs.
    #[error("no permission groups specified")]
    NoPermissionsSpecified,

    /// A permission input matched no catalog entry.
    #[error("permission group {input:?} not found{}; rerun with --list-permissions to inspect available values", suggestion_suffix(.suggestion))]
    PermissionNotFound {
        input: String,
        suggestion: Option<String>,
    },

    /// Neither a template file nor an inline template was supplied.
    #[error("either template_file or template_inline must be specified")]
    NoTemplateSource,

    /// Both a template file and an inline template were supplied.
    #[error("template_file and template_inline are mutually exclusive")]
    AmbiguousTemplateSource,

    /// The template file could not be read.
    #[error("read template file {}: {source}", path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template text could not be parsed.
    #[error("template syntax error: {message}")]
    TemplateSyntax { message: String },

    /// The template parsed but failed while executing against its variables.
    #[error("execute template: {message}")]
    TemplateExecution { message: String },

    /// The rendered template is not a JSON array of policy documents.
    #[error("parse rendered template as policies: {reason}\nRendered content:\n{rendered}")]
    TemplateOutputInvalid { rendered: String, reason: String },

    /// A template rendered to an empty policy list.
    #[error("at least one policy is required")]
    NoPolicies,

    /// The zone name is not present in the configured zone table.
    #[error("zone {name:?} not found in configured zones")]
    ZoneNotFound { name: String },

    /// No zone ID or zone name was supplied.
    #[error("missing zone identifier: provide via --zone-id or --zone")]
    MissingZone,

    /// No usable CIDR remained after merging overrides, zone and defaults.
    #[error("no allowed CIDRs configured; set --allow-cidrs or add default_allowed_cidrs to config.json")]
    NoCidrsConfigured,

    /// No token prefix could be determined.
    #[error("missing token prefix: provide via --token-prefix or use --zone with a named zone")]
    MissingTokenPrefix,

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The permission catalog could not be fetched.
    #[error("fetch permission groups: {0}")]
    Catalog(#[source] ProviderError),

    /// The token creation request failed.
    #[error("token creation failed: {0}")]
    Submission(#[source] ProviderError),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean {s:?}?)"))
        .unwrap_or_default()
}

impl TokenError {
    pub(crate) fn malformed_cidr(literal: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedCidr {
            literal: literal.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn template_syntax(message: impl Into<String>) -> Self {
        Self::TemplateSyntax {
            message: message.into(),
        }
    }

    pub(crate) fn template_execution(message: impl Into<String>) -> Self {
        Self::TemplateExecution {
            message: message.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TokenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_not_found_message_names_input() {
        let err = TokenError::PermissionNotFound {
            input: "Zone:Raed".to_string(),
            suggestion: Some("Zone Read".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"Zone:Raed\""));
        assert!(msg.contains("did you mean \"Zone Read\""));
    }

    #[test]
    fn test_template_output_invalid_keeps_rendered_text() {
        let err = TokenError::TemplateOutputInvalid {
            rendered: "[\"\"]".to_string(),
            reason: "invalid type".to_string(),
        };
        assert!(err.to_string().ends_with("Rendered content:\n[\"\"]"));
    }
}
