//! Secret Manager access.

use crate::services::google_auth::{AccessTokenSource, AuthError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const SECRET_MANAGER_API_BASE: &str = "https://secretmanager.googleapis.com/v1";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret accessor not configured: {0}")]
    NotConfigured(String),

    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret Manager error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Secret payload is not valid UTF-8 text")]
    InvalidPayload,

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

#[async_trait]
pub trait SecretAccessor: Send + Sync {
    /// Fetch one version of a secret.
    async fn access_secret_version(
        &self,
        secret_id: &str,
        version: &str,
    ) -> Result<SecretString, SecretError>;

    /// Fetch the latest version of a secret.
    async fn access_secret(&self, secret_id: &str) -> Result<SecretString, SecretError> {
        self.access_secret_version(secret_id, "latest").await
    }
}

/// Build the full version resource name. Accepts bare secret names, full
/// `projects/.../secrets/...` names, and names that already pin a version.
pub fn secret_version_name(
    secret_id: &str,
    version: &str,
    project_id: Option<&str>,
) -> Result<String, SecretError> {
    let secret_id = secret_id.trim().trim_matches('/');

    if secret_id.contains("/versions/") {
        return Ok(secret_id.to_string());
    }

    if secret_id.starts_with("projects/") {
        return Ok(format!("{}/versions/{}", secret_id, version));
    }

    let project_id = project_id.ok_or_else(|| {
        SecretError::NotConfigured(format!(
            "PROJECT_ID is required to resolve secret '{}'",
            secret_id
        ))
    })?;

    Ok(format!(
        "projects/{}/secrets/{}/versions/{}",
        project_id, secret_id, version
    ))
}

/// Google Cloud Secret Manager over REST.
pub struct SecretManagerClient {
    client: Client,
    token_source: Arc<AccessTokenSource>,
    project_id: Option<String>,
}

#[derive(Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

impl SecretManagerClient {
    pub fn new(
        token_source: Arc<AccessTokenSource>,
        project_id: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, SecretError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| SecretError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            token_source,
            project_id,
        })
    }
}

#[async_trait]
impl SecretAccessor for SecretManagerClient {
    async fn access_secret_version(
        &self,
        secret_id: &str,
        version: &str,
    ) -> Result<SecretString, SecretError> {
        let name = secret_version_name(secret_id, version, self.project_id.as_deref())?;
        tracing::info!(secret = %name, "Accessing secret");

        let token = self.token_source.token().await?;
        let response = self
            .client
            .get(format!("{}/{}:access", SECRET_MANAGER_API_BASE, name))
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| SecretError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(SecretError::NotFound(name));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SecretError::ApiError(format!("{}: {}", status, error_text)));
        }

        let body: AccessSecretVersionResponse = response
            .json()
            .await
            .map_err(|e| SecretError::ApiError(format!("Failed to parse response: {}", e)))?;

        decode_payload(&body.payload.data)
    }
}

fn decode_payload(data: &str) -> Result<SecretString, SecretError> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|_| SecretError::InvalidPayload)?;
    let text = String::from_utf8(bytes).map_err(|_| SecretError::InvalidPayload)?;
    Ok(SecretString::new(text))
}

/// In-process secrets, keyed by secret id. Used by tests and local runs.
#[derive(Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(secret_id.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretAccessor for StaticSecrets {
    async fn access_secret_version(
        &self,
        secret_id: &str,
        _version: &str,
    ) -> Result<SecretString, SecretError> {
        self.values
            .get(secret_id)
            .map(|value| SecretString::new(value.clone()))
            .ok_or_else(|| SecretError::NotFound(secret_id.to_string()))
    }
}
