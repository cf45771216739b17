//! Gemini client against a fake model API.

use axum::{body::Body, routing::post, Router};
use chat_service::models::ResolvedPrompt;
use chat_service::services::google_auth::AccessTokenSource;
use chat_service::services::providers::gemini::{GeminiClient, GeminiConfig, GeminiEndpoint};
use chat_service::services::providers::{ModelClient, ProviderError};
use futures::StreamExt;
use secrecy::SecretString;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-key";
const STREAM_PATH: &str = "/v1beta/models/gemini-2.0-flash:streamGenerateContent";

fn api_key_client(base_url: &str) -> GeminiClient {
    GeminiClient::new(
        GeminiConfig {
            endpoint: GeminiEndpoint::GenerativeLanguage {
                api_key: SecretString::new(API_KEY.to_string()),
            },
            base_url: Some(base_url.to_string()),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        },
        Arc::new(AccessTokenSource::Static(SecretString::new(
            "unused".to_string(),
        ))),
    )
    .expect("Failed to build Gemini client")
}

fn text_event(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
    )
}

fn prompt() -> ResolvedPrompt {
    ResolvedPrompt::Text("say hi".to_string())
}

async fn collect(client: &GeminiClient) -> Vec<Result<String, ProviderError>> {
    client
        .generate_stream("gemini-2.0-flash", &prompt())
        .await
        .unwrap()
        .collect()
        .await
}

#[tokio::test]
async fn generate_sends_key_header_and_returns_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", API_KEY))
        .and(body_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "say hi"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi there"}]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = api_key_client(&server.uri())
        .generate("gemini-2.0-flash", &prompt())
        .await
        .unwrap();

    assert_eq!(text, "Hi there");
}

#[tokio::test]
async fn vertex_calls_use_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/proj/locations/us-central1/publishers/google/models/gemini-2.0-flash:generateContent",
        ))
        .and(header("authorization", "Bearer ya29.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::new(
        GeminiConfig {
            endpoint: GeminiEndpoint::VertexAi {
                project_id: "proj".to_string(),
                location: "us-central1".to_string(),
            },
            base_url: Some(server.uri()),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        },
        Arc::new(AccessTokenSource::Static(SecretString::new(
            "ya29.test".to_string(),
        ))),
    )
    .unwrap();

    assert_eq!(
        client.generate("gemini-2.0-flash", &prompt()).await.unwrap(),
        "ok"
    );
}

#[tokio::test]
async fn stream_keeps_provider_order_and_flushes_last_event() {
    let server = MockServer::start().await;
    // The final event has no trailing blank line.
    let body = format!(
        "{}{}{}",
        text_event("Hi"),
        text_event(" there"),
        text_event("!").trim_end()
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param("alt", "sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let fragments: Vec<String> = collect(&api_key_client(&server.uri()))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(fragments, vec!["Hi", " there", "!"]);
}

#[tokio::test]
async fn stream_forwards_safety_stop_after_its_text() {
    let server = MockServer::start().await;
    let stop = format!(
        "data: {}\n\n",
        json!({"candidates": [{
            "content": {"parts": [{"text": "last words"}]},
            "finishReason": "SAFETY"
        }]})
    );
    let body = format!("{}{}{}", text_event("partial"), stop, text_event("never"));
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let items = collect(&api_key_client(&server.uri())).await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_deref().unwrap(), "partial");
    assert_eq!(items[1].as_deref().unwrap(), "last words");
    assert!(matches!(items[2], Err(ProviderError::ContentFiltered)));
}

#[tokio::test]
async fn stream_skips_thought_parts() {
    let server = MockServer::start().await;
    let thought = format!(
        "data: {}\n\n",
        json!({"candidates": [{"content": {"parts": [
            {"text": "internal reasoning", "thought": true},
            {"text": "answer"}
        ]}}]})
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(thought, "text/event-stream"))
        .mount(&server)
        .await;

    let items = collect(&api_key_client(&server.uri())).await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_deref().unwrap(), "answer");
}

#[tokio::test]
async fn rate_limit_is_reported_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
        .mount(&server)
        .await;

    let result = api_key_client(&server.uri())
        .generate_stream("gemini-2.0-flash", &prompt())
        .await;

    assert!(matches!(result, Err(ProviderError::RateLimited)));
}

/// Sends a oneshot when dropped, i.e. when the server stops writing the body.
struct BodyDropped(Option<oneshot::Sender<()>>);

impl Drop for BodyDropped {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn dropping_the_stream_ends_the_upstream_call() {
    let (dropped_tx, dropped_rx) = oneshot::channel();
    let guard = Arc::new(std::sync::Mutex::new(Some(BodyDropped(Some(dropped_tx)))));

    // One fragment, then keep-alive comments until the client disconnects.
    let app = Router::new().route(
        "/v1beta/models/*call",
        post(move || {
            let guard = guard.lock().unwrap().take();
            async move {
                let events = futures::stream::unfold((guard, 0u32), |(guard, n)| async move {
                    if n > 0 {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    let chunk = if n == 0 {
                        text_event("Hi")
                    } else {
                        ": ping\n\n".to_string()
                    };
                    Some((Ok::<_, Infallible>(chunk), (guard, n + 1)))
                });
                Body::from_stream(events)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let client = api_key_client(&address);
    let mut stream = client
        .generate_stream("gemini-2.0-flash", &prompt())
        .await
        .unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), "Hi");
    drop(stream);

    tokio::time::timeout(Duration::from_secs(5), dropped_rx)
        .await
        .expect("upstream body was still being read after the consumer went away")
        .unwrap();
}
