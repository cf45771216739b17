use crate::config::BlurbMode;
use crate::models::{BlurbRequest, ChatRequest};
use crate::services::providers::ProviderError;
use crate::services::storage::{generate_object_path, GENERATED_PREFIX};
use crate::services::streaming::stream_response;
use crate::startup::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use service_core::extract::ValidatedJson;

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub image_signed_path: String,
    pub image_full_path: String,
    pub image_bucket: String,
}

fn generation_error(e: ProviderError) -> AppError {
    tracing::error!(error = %e, "Error during generation");
    AppError::internal(format!("An error occurred: {}", e))
}

/// Generate text for the latest chat turn (or a bare prompt), either as one
/// JSON string or as a framed stream depending on the configured mode.
pub async fn chat_blurb(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<BlurbRequest>,
) -> Result<Response, AppError> {
    let normalized = state
        .normalizer
        .normalize(&request, &state.config.models.text_model)
        .await?;

    tracing::info!(
        model = %normalized.model,
        multimodal = normalized.prompt.image().is_some(),
        mode = ?state.config.chat.blurb_mode,
        "Generating blurb"
    );

    match state.config.chat.blurb_mode {
        BlurbMode::Batch => {
            let text = state
                .model
                .generate(&normalized.model, &normalized.prompt)
                .await
                .map_err(generation_error)?;
            Ok(Json(text).into_response())
        }
        BlurbMode::Stream => {
            let fragments = state
                .model
                .generate_stream(&normalized.model, &normalized.prompt)
                .await
                .map_err(generation_error)?;
            Ok(stream_response(fragments))
        }
    }
}

/// Generate an image for the latest chat turn, store it next to the consulted
/// attachment (or under `generated/`), and return a signed URL for it.
pub async fn chat_image(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ChatRequest>,
) -> Result<Json<ImageResponse>, AppError> {
    let normalized = state
        .normalizer
        .normalize_chat(&request, &state.config.models.image_model)
        .await?;

    let content = state
        .model
        .generate_image(&normalized.model, &normalized.prompt)
        .await
        .map_err(generation_error)?;

    let image = content.into_first_image().ok_or_else(|| {
        tracing::warn!(model = %normalized.model, "Model returned no image part");
        AppError::bad_request("Image upload failed: the model returned no image")
    })?;

    let bucket = normalized
        .attachment
        .as_ref()
        .map(|a| a.bucket.clone())
        .unwrap_or_else(|| state.config.storage.default_bucket.clone());
    let prefix = normalized
        .attachment
        .as_ref()
        .and_then(|a| a.parent_dir())
        .unwrap_or(GENERATED_PREFIX);
    let path = generate_object_path(prefix, &image.mime_type);

    let stored = state
        .storage
        .upload(&bucket, &path, image.data, &image.mime_type)
        .await
        .map_err(|e| {
            tracing::error!(bucket = %bucket, path = %path, error = %e, "Image upload failed");
            AppError::bad_request(format!("Image upload failed: {}", e))
        })?;

    let signed_url = state
        .storage
        .create_signed_url(&bucket, &stored.path, state.config.storage.signed_url_ttl_secs)
        .await
        .map_err(|e| {
            tracing::error!(bucket = %bucket, path = %stored.path, error = %e, "Signing failed");
            AppError::bad_request(format!("Missing signed path for uploaded image: {}", e))
        })?;

    tracing::info!(bucket = %bucket, path = %stored.full_path, "Generated image stored");

    Ok(Json(ImageResponse {
        image_signed_path: signed_url,
        image_full_path: stored.full_path,
        image_bucket: bucket,
    }))
}
