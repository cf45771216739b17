//! Request extractors shared by the HTTP services.

use crate::error::AppError;
use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body extractor that reports malformed bodies and failed validation as
/// `400 {"detail": ...}` instead of axum's plain-text rejections.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| AppError::bad_request(rejection.body_text()))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request as HttpRequest, StatusCode, header},
        routing::post,
    };
    use http_body_util::BodyExt;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize, Validate)]
    struct Greeting {
        #[validate(length(min = 1))]
        names: Vec<String>,
    }

    async fn greet(ValidatedJson(body): ValidatedJson<Greeting>) -> String {
        body.names.join(",")
    }

    async fn send(body: &str) -> (StatusCode, String) {
        let app = Router::new().route("/", post(greet));
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn accepts_valid_body() {
        let (status, body) = send(r#"{"names":["a","b"]}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "a,b");
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let (status, body) = send(r#"{}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("detail"));
    }

    #[tokio::test]
    async fn failed_validation_is_bad_request() {
        let (status, _) = send(r#"{"names":[]}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
