use thiserror::Error;

use crate::models::ApiMessage;

/// Errors returned by [`CloudflareClient`](crate::CloudflareClient).
#[derive(Debug, Error)]
pub enum CloudflareError {
    /// Transport failure, including timeouts.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status or `"success": false`.
    #[error("cloudflare API error (HTTP {status}): {}", join_messages(.messages))]
    Api { status: u16, messages: Vec<ApiMessage> },

    /// The response body was not the expected JSON envelope.
    #[error("decode cloudflare response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A successful response carried no `result`.
    #[error("cloudflare API returned an empty {0} response")]
    EmptyResult(&'static str),

    #[error("token ID is required")]
    MissingTokenId,
}

fn join_messages(messages: &[ApiMessage]) -> String {
    if messages.is_empty() {
        return "no error details returned".to_string();
    }
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_lists_every_message() {
        let err = CloudflareError::Api {
            status: 400,
            messages: vec![
                ApiMessage { code: 1000, message: "Invalid API Token".into() },
                ApiMessage { code: 9106, message: "Missing X-Auth-Key".into() },
            ],
        };
        assert_eq!(
            err.to_string(),
            "cloudflare API error (HTTP 400): 1000: Invalid API Token; 9106: Missing X-Auth-Key"
        );
    }

    #[test]
    fn test_api_error_without_messages() {
        let err = CloudflareError::Api { status: 502, messages: Vec::new() };
        assert!(err.to_string().ends_with("no error details returned"));
    }
}
