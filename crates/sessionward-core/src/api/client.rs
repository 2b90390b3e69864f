//! Authenticated request pipeline.
//!
//! Every call made through [`ApiClient`] carries the stored access
//! credential. A credential rejection triggers one coordinated renewal and a
//! single resend; every other failure is classified before it reaches the
//! caller.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{CredentialStore, EndReason, SessionManager, TokenStorage};
use crate::config::Config;

use super::auth::{AuthApi, LoginResponse, UserProfile};
use super::classify::FailureClassifier;
use super::error::ApiError;
use super::notify::{NotificationSink, NotificationSlot};
use super::request::{ApiRequest, MultipartBody};

/// Status the backend uses for a missing, invalid or expired access credential.
const CREDENTIAL_REJECTED: StatusCode = StatusCode::UNAUTHORIZED;

/// Handle the host application uses for every backend call.
/// Clone is cheap; clones share the session and the notification sink.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: SessionManager,
    auth: AuthApi,
    classifier: FailureClassifier,
}

impl ApiClient {
    /// Open the configured token storage and build the client around it.
    pub fn connect(config: &Config) -> Result<Self> {
        let storage = config.token_storage()?;
        Self::with_storage(config, storage)
    }

    /// Build the client with an explicit storage backend.
    /// Must be called from within a Tokio runtime.
    pub fn with_storage(config: &Config, storage: Box<dyn TokenStorage>) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let auth = AuthApi::new(client.clone(), config.base_url.clone(), config.endpoints.clone());
        let store = CredentialStore::open(storage);
        let session = SessionManager::new(store, Arc::new(auth.clone()), config.renewal_interval());

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            session,
            auth,
            classifier: FailureClassifier::new(NotificationSlot::new()),
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register the process-wide sink for server failure messages,
    /// replacing any previous one.
    pub fn set_notification_sink(&self, sink: impl NotificationSink + 'static) {
        self.classifier.notifications().set(Arc::new(sink));
    }

    pub fn clear_notification_sink(&self) {
        self.classifier.notifications().clear();
    }

    // ===== Session lifecycle =====

    /// Exchange identifier and secret for credentials and establish the session.
    /// Wrong credentials come back as an ordinary `Rejected` failure.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let response = self
            .auth
            .send_login(email, password)
            .await
            .map_err(|e| self.classifier.transport(e))?;
        let response = self.classifier.check(response).await?;
        let tokens: LoginResponse = Self::decode(response).await?;

        self.session.establish(tokens.into());
        info!("Logged in");
        Ok(())
    }

    /// Tell the backend (best effort), then end the session locally.
    pub async fn logout(&self) {
        let pair = self.session.credentials();
        if !pair.is_empty() {
            match self.auth.send_logout(&pair).await {
                Ok(response) if !response.status().is_success() => {
                    debug!(status = response.status().as_u16(), "Logout exchange rejected");
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Logout exchange failed"),
            }
        }
        self.session.end_with(EndReason::LoggedOut);
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        let path = self.auth.endpoints().me.clone();
        self.get_json(&path).await
    }

    // ===== Pipeline =====

    /// Send a request through the pipeline.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response, ApiError> {
        loop {
            let access = self.session.access_token();
            let builder = request.build(&self.client, &self.base_url, access.as_deref())?;

            debug!(
                method = %request.method(),
                path = request.path(),
                retry = request.credential_retries(),
                "Sending request"
            );
            let response = builder
                .send()
                .await
                .map_err(|e| self.classifier.transport(e))?;

            if response.status() == CREDENTIAL_REJECTED && request.can_retry() {
                debug!(path = request.path(), "Credential rejected, renewing");
                let fresh = self
                    .session
                    .ensure_fresh_credential()
                    .await
                    .map_err(ApiError::AuthenticationExpired)?;
                request.mark_retried(fresh);
                continue;
            }

            if response.status() == CREDENTIAL_REJECTED {
                warn!(path = request.path(), "Credential rejected after renewal, giving up");
            }
            return self.classifier.check(response).await;
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::get(path)).await?;
        Self::decode(response).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::post(path).json(body)?).await?;
        Self::decode(response).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::put(path).json(body)?).await?;
        Self::decode(response).await
    }

    pub async fn patch_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::patch(path).json(body)?).await?;
        Self::decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// Multipart upload; the form is rebuilt if the request has to be resent.
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, form: MultipartBody) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::post(path).multipart(form)).await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let path = response.url().path().to_string();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("failed to read body from {}: {}", path, e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("failed to parse JSON from {}: {}", path, e)))
    }
}
