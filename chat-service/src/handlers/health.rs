use axum::http::StatusCode;

/// Liveness check. Never touches the model, storage or secret clients.
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
