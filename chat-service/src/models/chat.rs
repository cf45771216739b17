//! Chat payloads as sent by the web client.
//!
//! Messages follow the client SDK's wire shape (`camelCase`, attachments under
//! `experimental_attachments`). Everything here is read-only once deserialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A file attached to a message. `name` carries the storage bucket and `url`
/// the object path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub url: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(
        default,
        alias = "experimental_attachments",
        alias = "experimentalAttachments"
    )]
    pub attachments: Option<Vec<Attachment>>,
}

impl ChatMessage {
    /// The only attachment that is ever consulted: the last one.
    pub fn last_attachment(&self) -> Option<&Attachment> {
        self.attachments.as_deref().and_then(<[Attachment]>::last)
    }
}

/// Conversation payload. The last message is the active turn.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[validate(length(min = 1, message = "messages must contain at least one message"))]
    pub messages: Vec<ChatMessage>,
    #[serde(default, alias = "selectedModel")]
    pub selected_chat_model: Option<String>,
}

impl ChatRequest {
    pub fn latest_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// Single-prompt payload: `{"prompt": "...", "model": "..."}`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PromptRequest {
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Body accepted by `/chat/blurb`: either a full conversation or a bare prompt.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BlurbRequest {
    Chat(ChatRequest),
    Prompt(PromptRequest),
}

impl Validate for BlurbRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            BlurbRequest::Chat(request) => request.validate(),
            BlurbRequest::Prompt(request) => request.validate(),
        }
    }
}
