//! Gemini provider implementation.
//!
//! Talks to either Vertex AI (project + location, OAuth bearer token) or the
//! public Generative Language API (API key). Both share the same
//! `generateContent` / `streamGenerateContent` request and response shapes.

use super::{GeneratedContent, GeneratedPart, ModelClient, ProviderError, TextStream};
use crate::models::{InlineImage, ResolvedPrompt};
use crate::services::google_auth::AccessTokenSource;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Generative Language API root.
const GENERATIVE_LANGUAGE_API_ROOT: &str = "https://generativelanguage.googleapis.com";

/// Which Gemini deployment to call.
#[derive(Debug, Clone)]
pub enum GeminiEndpoint {
    VertexAi { project_id: String, location: String },
    GenerativeLanguage { api_key: SecretString },
}

/// Gemini provider configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub endpoint: GeminiEndpoint,
    /// Replaces the Google host (scheme and authority), e.g. for a local emulator.
    pub base_url: Option<String>,
    pub connect_timeout: Duration,
    /// Applied to non-streaming calls only; streams stay open until the model finishes.
    pub request_timeout: Duration,
}

/// Gemini model client.
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
    token_source: Arc<AccessTokenSource>,
}

impl GeminiClient {
    pub fn new(
        config: GeminiConfig,
        token_source: Arc<AccessTokenSource>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            token_source,
        })
    }

    /// Build the API URL for the given model and method.
    fn api_url(&self, model: &str, method: &str) -> String {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'));

        match &self.config.endpoint {
            GeminiEndpoint::VertexAi {
                project_id,
                location,
            } => {
                let root = match base_url {
                    Some(url) => url.to_string(),
                    None if location == "global" => "https://aiplatform.googleapis.com".to_string(),
                    None => format!("https://{}-aiplatform.googleapis.com", location),
                };
                format!(
                    "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
                    root, project_id, location, model, method
                )
            }
            GeminiEndpoint::GenerativeLanguage { .. } => format!(
                "{}/v1beta/models/{}:{}",
                base_url.unwrap_or(GENERATIVE_LANGUAGE_API_ROOT),
                model,
                method
            ),
        }
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ProviderError> {
        match &self.config.endpoint {
            GeminiEndpoint::GenerativeLanguage { api_key } => {
                Ok(request.header("x-goog-api-key", api_key.expose_secret()))
            }
            GeminiEndpoint::VertexAi { .. } => {
                let token = self
                    .token_source
                    .token()
                    .await
                    .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
                Ok(request.bearer_auth(token.expose_secret()))
            }
        }
    }

    async fn post(
        &self,
        model: &str,
        request: &GenerateContentRequest,
        streaming: bool,
    ) -> Result<Response, ProviderError> {
        let builder = if streaming {
            let url = format!("{}?alt=sse", self.api_url(model, "streamGenerateContent"));
            self.client.post(url)
        } else {
            self.client
                .post(self.api_url(model, "generateContent"))
                .timeout(self.config.request_timeout)
        };

        let response = self
            .authorize(builder)
            .await?
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GeneratedContent, ProviderError> {
        let response = self.post(model, request, false).await?;

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        if let Some(usage) = &api_response.usage_metadata {
            tracing::info!(
                model,
                input_tokens = usage.prompt_token_count.unwrap_or(0),
                output_tokens = usage.candidates_token_count.unwrap_or(0),
                "Gemini generation complete"
            );
        }

        into_content(api_response)
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<String, ProviderError> {
        let request = build_request(prompt, None);

        tracing::debug!(
            model,
            prompt_len = prompt.text().len(),
            has_image = prompt.image().is_some(),
            "Sending request to Gemini API"
        );

        let text = self.generate_content(model, &request).await?.text();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }

    async fn generate_stream(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<TextStream, ProviderError> {
        let request = build_request(prompt, None);

        tracing::debug!(
            model,
            prompt_len = prompt.text().len(),
            has_image = prompt.image().is_some(),
            "Starting streaming request to Gemini API"
        );

        let response = self.post(model, &request, true).await?;

        // Create channel for streaming
        let (tx, rx) = mpsc::channel(32);

        // Spawn task to process SSE stream. Dropping the receiver ends the task,
        // which drops the upstream response and aborts the generation call.
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            loop {
                let chunk_result = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("Stream consumer went away, aborting upstream");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(chunk_result) => chunk_result,
                        None => {
                            if let Some(data) = decoder.finish() {
                                forward_event(&tx, &data).await;
                            }
                            return;
                        }
                    },
                };

                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::NetworkError(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in decoder.push(&chunk) {
                    if !forward_event(&tx, &data).await {
                        return;
                    }
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Box::pin(stream) as TextStream)
    }

    async fn generate_image(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<GeneratedContent, ProviderError> {
        let request = build_request(prompt, Some(vec!["TEXT", "IMAGE"]));

        tracing::debug!(
            model,
            prompt_len = prompt.text().len(),
            has_image = prompt.image().is_some(),
            "Sending image generation request to Gemini API"
        );

        self.generate_content(model, &request).await
    }
}

/// Send the items of one SSE event. Returns false once the stream should stop,
/// either because the consumer is gone or an error was forwarded.
async fn forward_event(tx: &mpsc::Sender<Result<String, ProviderError>>, data: &str) -> bool {
    let response = match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable stream event");
            return true;
        }
    };

    for item in stream_items(response) {
        let is_error = item.is_err();
        if tx.send(item).await.is_err() || is_error {
            return false;
        }
    }
    true
}

/// Image first, then text, as a single user turn.
fn build_request(
    prompt: &ResolvedPrompt,
    response_modalities: Option<Vec<&str>>,
) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(2);

    if let Some(image) = prompt.image() {
        parts.push(ContentPart::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: STANDARD.encode(&image.data),
            },
        });
    }

    let text = prompt.text();
    if !text.is_empty() || parts.is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_string(),
            thought: false,
        });
    }

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: response_modalities.map(|modalities| GenerationConfig {
            response_modalities: Some(modalities.into_iter().map(String::from).collect()),
        }),
    }
}

fn is_filtered(finish_reason: Option<&str>) -> bool {
    matches!(
        finish_reason,
        Some("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" | "IMAGE_SAFETY")
    )
}

/// Convert the first candidate of a complete response.
fn into_content(response: GenerateContentResponse) -> Result<GeneratedContent, ProviderError> {
    if response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_ref())
        .is_some()
    {
        return Err(ProviderError::ContentFiltered);
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse)?;

    if is_filtered(candidate.finish_reason.as_deref()) {
        return Err(ProviderError::ContentFiltered);
    }

    let mut parts = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        match part {
            ContentPart::Text { thought: true, .. } => {}
            ContentPart::Text { text, .. } => parts.push(GeneratedPart::Text(text)),
            ContentPart::InlineData { inline_data } => {
                let data = STANDARD.decode(inline_data.data.as_bytes()).map_err(|e| {
                    ProviderError::ApiError(format!("Invalid inline image data: {}", e))
                })?;
                parts.push(GeneratedPart::Image(InlineImage {
                    data,
                    mime_type: inline_data.mime_type,
                }));
            }
            ContentPart::Other(_) => {}
        }
    }

    Ok(GeneratedContent { parts })
}

/// What one streamed event contributes: its answer text, then a filter error
/// when the event also carries a safety stop.
fn stream_items(response: GenerateContentResponse) -> Vec<Result<String, ProviderError>> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Vec::new();
    };

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| match part {
            ContentPart::Text {
                text,
                thought: false,
            } => Some(text),
            _ => None,
        })
        .collect();

    let mut items = Vec::with_capacity(2);
    if !text.is_empty() {
        items.push(Ok(text));
    }
    if is_filtered(candidate.finish_reason.as_deref()) {
        items.push(Err(ProviderError::ContentFiltered));
    }
    items
}

/// Incremental server-sent-events splitter. Buffers raw bytes so multi-byte
/// characters split across network chunks survive intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk and return the `data` payloads of every completed event.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, delimiter_len)) = find_event_end(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + delimiter_len).collect();
            events.extend(event_data(&event[..end]));
        }
        events
    }

    /// Flush an event left in the buffer when the body ends without a blank line.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_data(&rest)
    }
}

/// Joined `data:` lines of one event; `None` for comments and empty events.
fn event_data(event: &[u8]) -> Option<String> {
    let event = String::from_utf8_lossy(event);
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();

    (!data.is_empty()).then(|| data.join("\n"))
}

fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
        /// Reasoning summaries; never part of the answer.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
    },
    InlineData {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
    /// Function calls, thoughts and anything else this service does not use.
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
