//! Login, renewal and logout exchanges.
//!
//! These calls go straight to the backend with the bare HTTP client: they
//! never carry the stored access credential unless asked to and are never
//! retried by the pipeline.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{CredentialPair, RenewalFailure, RenewedTokens, TokenRenewer};
use crate::config::AuthEndpoints;

use super::request::join_url;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    access: String,
    refresh: String,
}

impl From<LoginResponse> for CredentialPair {
    fn from(tokens: LoginResponse) -> Self {
        CredentialPair::new(tokens.access, tokens.refresh)
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Profile returned by the current-user endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserProfile {
    /// "First Last", or the email when no name is set.
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("").trim();
        let last = self.last_name.as_deref().unwrap_or("").trim();
        let full = format!("{} {}", first, last).trim().to_string();
        if full.is_empty() {
            self.email.clone()
        } else {
            full
        }
    }
}

/// The authentication endpoints of the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthApi {
    client: Client,
    base_url: String,
    endpoints: AuthEndpoints,
}

impl AuthApi {
    pub fn new(client: Client, base_url: impl Into<String>, endpoints: AuthEndpoints) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Submit identifier and secret. The caller classifies the response.
    pub(crate) async fn send_login(&self, email: &str, password: &str) -> reqwest::Result<Response> {
        debug!("Sending login exchange");
        self.client
            .post(join_url(&self.base_url, &self.endpoints.login))
            .json(&LoginRequest { email, password })
            .send()
            .await
    }

    /// Tell the backend the session is over. Best effort.
    pub(crate) async fn send_logout(&self, pair: &CredentialPair) -> reqwest::Result<Response> {
        let mut request = self
            .client
            .post(join_url(&self.base_url, &self.endpoints.logout))
            .json(&serde_json::json!({ "refresh": pair.refresh }));
        if let Some(ref access) = pair.access {
            request = request.bearer_auth(access);
        }
        request.send().await
    }
}

#[async_trait]
impl TokenRenewer for AuthApi {
    async fn renew(&self, refresh: &str) -> Result<RenewedTokens, RenewalFailure> {
        let response = self
            .client
            .post(join_url(&self.base_url, &self.endpoints.refresh))
            .json(&RefreshRequest { refresh })
            .send()
            .await
            .map_err(|e| RenewalFailure::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenewalFailure::Rejected(status.as_u16()));
        }

        let tokens: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RenewalFailure::Exchange(format!("invalid renewal response: {}", e)))?;

        Ok(RenewedTokens {
            access: tokens.access,
            refresh: tokens.refresh,
        })
    }
}
