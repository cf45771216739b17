use crate::startup::AppState;
use axum::{extract::State, Json};
use secrecy::ExposeSecret;
use serde::Serialize;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
pub struct SecretMessage {
    pub message: String,
}

/// Read the configured example secret back, proving Secret Manager access works.
pub async fn secret_check(State(state): State<AppState>) -> Result<Json<SecretMessage>, AppError> {
    let secret_id = state
        .config
        .secrets
        .example_secret_id
        .as_deref()
        .ok_or_else(|| AppError::internal("An error occurred: EXAMPLE_SECRET_ID is not set"))?;

    let secret = state.secrets.access_secret(secret_id).await.map_err(|e| {
        tracing::error!(secret_id, error = %e, "Secret access failed");
        AppError::internal(format!("An error occurred: {}", e))
    })?;

    Ok(Json(SecretMessage {
        message: secret.expose_secret().clone(),
    }))
}
