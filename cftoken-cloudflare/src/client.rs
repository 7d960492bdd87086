//! HTTP client for the Cloudflare API.

use std::time::Duration;

use async_trait::async_trait;
use cftoken_core::{
    PermissionCatalog, PermissionCatalogEntry, ProviderError, TokenResult, TokenSink,
    TokenSpecification,
};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::CloudflareError;
use crate::models::{
    api_timestamp, ApiToken, CreateTokenRequest, Envelope, PermissionGroup, RequestCondition,
    RequestIpCondition, TokenInspection, TokenVerification,
};

pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
pub const DEFAULT_USER_AGENT: &str = "cftoken-cli/0.1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for the `/user/tokens` endpoints.
#[derive(Clone)]
pub struct CloudflareClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

/// Builder for [`CloudflareClient`].
pub struct CloudflareClientBuilder {
    token: String,
    base_url: String,
    user_agent: String,
    timeout: Duration,
}

impl CloudflareClientBuilder {
    /// Override the API base URL (useful for testing).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Total per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Finish the client. No request is sent until an endpoint is called.
    ///
    /// # Errors
    ///
    /// Returns [`CloudflareError::Http`] when the TLS backend cannot be
    /// initialized.
    pub fn build(self) -> Result<CloudflareClient, CloudflareError> {
        let http = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .timeout(self.timeout)
            .build()?;
        Ok(CloudflareClient {
            http,
            base_url: self.base_url,
            token: self.token,
        })
    }
}

impl CloudflareClient {
    pub fn builder(token: impl Into<String>) -> CloudflareClientBuilder {
        CloudflareClientBuilder {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Same endpoint and settings, authenticated with a different token.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        log::debug!("cloudflare request: {method} {url}");
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// All permission groups available to the current token.
    pub async fn permission_groups(&self) -> Result<Vec<PermissionGroup>, CloudflareError> {
        let response = self
            .request(Method::GET, "/user/tokens/permission_groups")
            .send()
            .await?;
        read_result(response, "permission group").await
    }

    /// Create a token from a finished specification.
    pub async fn create_token(
        &self,
        spec: &TokenSpecification,
    ) -> Result<TokenResult, CloudflareError> {
        let body = CreateTokenRequest {
            name: &spec.name,
            policies: &spec.policies,
            expires_on: spec.expires_at.as_ref().map(api_timestamp),
            condition: (!spec.allowed_cidrs.is_empty()).then(|| RequestCondition {
                request_ip: RequestIpCondition {
                    allowed: &spec.allowed_cidrs,
                },
            }),
        };
        let response = self
            .request(Method::POST, "/user/tokens")
            .json(&body)
            .send()
            .await?;
        let result: TokenResult = read_result(response, "token creation").await?;
        if result.id.trim().is_empty() {
            return Err(CloudflareError::MissingTokenId);
        }
        Ok(result)
    }

    /// Metadata about the token this client authenticates with.
    pub async fn verify_token(&self) -> Result<TokenVerification, CloudflareError> {
        let response = self.request(Method::GET, "/user/tokens/verify").send().await?;
        read_result(response, "token verification").await
    }

    /// Fetch a token by ID and summarise its policies and IP conditions.
    pub async fn describe_token(&self, token_id: &str) -> Result<TokenInspection, CloudflareError> {
        let token_id = token_id.trim();
        if token_id.is_empty() {
            return Err(CloudflareError::MissingTokenId);
        }
        let response = self
            .request(Method::GET, &format!("/user/tokens/{token_id}"))
            .send()
            .await?;
        let token: ApiToken = read_result(response, "token").await?;
        Ok(TokenInspection::from(token))
    }
}

async fn read_result<T: DeserializeOwned>(
    response: Response,
    what: &'static str,
) -> Result<T, CloudflareError> {
    let status = response.status();
    let body = response.text().await?;

    let envelope: Envelope<T> = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(CloudflareError::Api {
                status: status.as_u16(),
                messages: Vec::new(),
            })
        }
        Err(e) => return Err(CloudflareError::Decode(e)),
    };

    if !status.is_success() || envelope.success == Some(false) {
        return Err(CloudflareError::Api {
            status: status.as_u16(),
            messages: envelope.errors,
        });
    }
    envelope.result.ok_or(CloudflareError::EmptyResult(what))
}

#[async_trait]
impl PermissionCatalog for CloudflareClient {
    async fn permission_catalog(&self) -> Result<Vec<PermissionCatalogEntry>, ProviderError> {
        let groups = self.permission_groups().await?;
        log::info!("fetched {} permission group(s)", groups.len());
        Ok(groups.iter().map(PermissionCatalogEntry::from).collect())
    }
}

#[async_trait]
impl TokenSink for CloudflareClient {
    async fn create_token(&self, spec: &TokenSpecification) -> Result<TokenResult, ProviderError> {
        Ok(Self::create_token(self, spec).await?)
    }
}
