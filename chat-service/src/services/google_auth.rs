//! OAuth access tokens for Google Cloud APIs (Vertex AI, Secret Manager).

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// GCE/Cloud Run metadata server token endpoint for the default service account.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Metadata server unreachable: {0}")]
    NetworkError(String),

    #[error("Metadata server returned {0}")]
    ApiError(String),
}

/// Where bearer tokens come from.
pub enum AccessTokenSource {
    /// Fixed token, e.g. from `gcloud auth print-access-token` during development.
    Static(SecretString),
    /// Ask the instance metadata server on every call.
    MetadataServer { client: Client },
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

impl AccessTokenSource {
    pub fn metadata_server(connect_timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        Ok(AccessTokenSource::MetadataServer { client })
    }

    pub async fn token(&self) -> Result<SecretString, AuthError> {
        match self {
            AccessTokenSource::Static(token) => {
                Ok(SecretString::new(token.expose_secret().clone()))
            }
            AccessTokenSource::MetadataServer { client } => {
                let response = client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| AuthError::NetworkError(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(AuthError::ApiError(response.status().to_string()));
                }

                let token: MetadataToken = response
                    .json()
                    .await
                    .map_err(|e| AuthError::ApiError(format!("unreadable token: {}", e)))?;

                Ok(SecretString::new(token.access_token))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let source = AccessTokenSource::Static(SecretString::new("ya29.token".to_string()));
        let token = source.token().await.unwrap();
        assert_eq!(token.expose_secret(), "ya29.token");
    }
}
