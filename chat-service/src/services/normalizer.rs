//! Turns an incoming chat payload into the prompt the model is asked.

use crate::models::{BlurbRequest, ChatRequest, InlineImage, PromptRequest, ResolvedPrompt};
use crate::services::storage::ObjectStorage;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Request contains no messages")]
    EmptyConversation,
}

impl From<NormalizeError> for AppError {
    fn from(err: NormalizeError) -> Self {
        AppError::bad_request(err)
    }
}

/// The attachment that was consulted, in storage terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
}

impl AttachmentRef {
    /// Directory part of the object path, used as the prefix for derived objects.
    pub fn parent_dir(&self) -> Option<&str> {
        self.path
            .trim_matches('/')
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub model: String,
    pub prompt: ResolvedPrompt,
    pub attachment: Option<AttachmentRef>,
}

#[derive(Clone)]
pub struct RequestNormalizer {
    storage: Arc<dyn ObjectStorage>,
    default_bucket: String,
}

impl RequestNormalizer {
    pub fn new(storage: Arc<dyn ObjectStorage>, default_bucket: impl Into<String>) -> Self {
        Self {
            storage,
            default_bucket: default_bucket.into(),
        }
    }

    pub async fn normalize(
        &self,
        request: &BlurbRequest,
        default_model: &str,
    ) -> Result<NormalizedRequest, NormalizeError> {
        match request {
            BlurbRequest::Chat(chat) => self.normalize_chat(chat, default_model).await,
            BlurbRequest::Prompt(prompt) => Ok(Self::normalize_prompt(prompt, default_model)),
        }
    }

    pub fn normalize_prompt(request: &PromptRequest, default_model: &str) -> NormalizedRequest {
        NormalizedRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            prompt: ResolvedPrompt::Text(request.prompt.clone()),
            attachment: None,
        }
    }

    /// Use the latest message's text and, when it carries attachments, the
    /// bytes of its last attachment. A failed download degrades to text only.
    pub async fn normalize_chat(
        &self,
        request: &ChatRequest,
        default_model: &str,
    ) -> Result<NormalizedRequest, NormalizeError> {
        let message = request
            .latest_message()
            .ok_or(NormalizeError::EmptyConversation)?;

        let model = request
            .selected_chat_model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_model.to_string());
        let text = message.content.clone();

        let Some(attachment) = message.last_attachment() else {
            return Ok(NormalizedRequest {
                model,
                prompt: ResolvedPrompt::Text(text),
                attachment: None,
            });
        };

        let attachment = AttachmentRef {
            bucket: attachment
                .name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| self.default_bucket.clone()),
            path: attachment.url.clone(),
            content_type: attachment.content_type.clone(),
        };

        let prompt = match self
            .storage
            .download(&attachment.bucket, &attachment.path)
            .await
        {
            Ok(data) => ResolvedPrompt::Multimodal {
                image: InlineImage {
                    data,
                    mime_type: attachment.content_type.clone(),
                },
                text,
            },
            Err(e) => {
                tracing::warn!(
                    bucket = %attachment.bucket,
                    path = %attachment.path,
                    error = %e,
                    "Attachment download failed, continuing with text only"
                );
                ResolvedPrompt::Text(text)
            }
        };

        Ok(NormalizedRequest {
            model,
            prompt,
            attachment: Some(attachment),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::MemoryStorage;
    use serde_json::json;

    const DEFAULT_MODEL: &str = "gemini-2.0-flash";

    fn chat(value: serde_json::Value) -> ChatRequest {
        serde_json::from_value(value).unwrap()
    }

    fn normalizer(storage: &Arc<MemoryStorage>) -> RequestNormalizer {
        RequestNormalizer::new(storage.clone(), "images")
    }

    #[tokio::test]
    async fn text_only_request_uses_latest_content() {
        let storage = Arc::new(MemoryStorage::new());
        let request = chat(json!({
            "id": "c1",
            "selectedChatModel": "gemini-1.5-pro",
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "  second question  "}
            ]
        }));

        let normalized = normalizer(&storage)
            .normalize_chat(&request, DEFAULT_MODEL)
            .await
            .unwrap();

        assert_eq!(normalized.model, "gemini-1.5-pro");
        assert_eq!(
            normalized.prompt,
            ResolvedPrompt::Text("  second question  ".to_string())
        );
        assert!(normalized.attachment.is_none());
        assert_eq!(storage.download_count(), 0);
    }

    #[tokio::test]
    async fn only_the_last_attachment_is_fetched() {
        let storage = Arc::new(
            MemoryStorage::new()
                .with_object("uploads", "u1/first.png", b"first", "image/png")
                .with_object("uploads", "u1/last.jpg", b"last", "image/jpeg"),
        );
        let request = chat(json!({
            "messages": [{
                "role": "user",
                "content": "what is in this photo?",
                "experimental_attachments": [
                    {"name": "uploads", "contentType": "image/png", "url": "u1/first.png"},
                    {"name": "uploads", "contentType": "image/png", "url": "u1/middle.png"},
                    {"name": "uploads", "contentType": "image/jpeg", "url": "u1/last.jpg"}
                ]
            }]
        }));

        let normalized = normalizer(&storage)
            .normalize_chat(&request, DEFAULT_MODEL)
            .await
            .unwrap();

        assert_eq!(storage.download_count(), 1);
        assert_eq!(normalized.model, DEFAULT_MODEL);
        assert_eq!(
            normalized.prompt,
            ResolvedPrompt::Multimodal {
                image: InlineImage {
                    data: b"last".to_vec(),
                    mime_type: "image/jpeg".to_string(),
                },
                text: "what is in this photo?".to_string(),
            }
        );

        let attachment = normalized.attachment.unwrap();
        assert_eq!(attachment.bucket, "uploads");
        assert_eq!(attachment.parent_dir(), Some("u1"));
    }

    #[tokio::test]
    async fn failed_download_degrades_to_text() {
        let storage = Arc::new(MemoryStorage::new().with_object(
            "uploads",
            "a.png",
            b"png",
            "image/png",
        ));
        storage.fail_downloads(true);

        let request = chat(json!({
            "messages": [{
                "role": "user",
                "content": "describe",
                "attachments": [{"name": "uploads", "contentType": "image/png", "url": "a.png"}]
            }]
        }));

        let normalized = normalizer(&storage)
            .normalize_chat(&request, DEFAULT_MODEL)
            .await
            .unwrap();

        assert_eq!(storage.download_count(), 1);
        assert_eq!(normalized.prompt, ResolvedPrompt::Text("describe".to_string()));
        assert!(normalized.attachment.is_some());
    }

    #[tokio::test]
    async fn unnamed_attachment_uses_default_bucket() {
        let storage = Arc::new(MemoryStorage::new().with_object(
            "images",
            "x.png",
            b"img",
            "image/png",
        ));
        let request = chat(json!({
            "messages": [{
                "role": "user",
                "content": "hi",
                "attachments": [{"contentType": "image/png", "url": "x.png"}]
            }]
        }));

        let normalized = normalizer(&storage)
            .normalize_chat(&request, DEFAULT_MODEL)
            .await
            .unwrap();

        assert_eq!(normalized.attachment.as_ref().unwrap().bucket, "images");
        assert!(normalized.prompt.image().is_some());
        assert_eq!(normalized.attachment.unwrap().parent_dir(), None);
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let request = chat(json!({"messages": []}));

        let err = normalizer(&storage)
            .normalize_chat(&request, DEFAULT_MODEL)
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizeError::EmptyConversation));
    }

    #[tokio::test]
    async fn prompt_request_defaults_model() {
        let storage = Arc::new(MemoryStorage::new());
        let request: BlurbRequest = serde_json::from_value(json!({"prompt": "a blurb"})).unwrap();

        let normalized = normalizer(&storage)
            .normalize(&request, DEFAULT_MODEL)
            .await
            .unwrap();

        assert_eq!(normalized.model, DEFAULT_MODEL);
        assert_eq!(normalized.prompt, ResolvedPrompt::Text("a blurb".to_string()));
    }
}
