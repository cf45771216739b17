//! Domain models for the chat service.

pub mod chat;
pub mod prompt;

pub use chat::{Attachment, BlurbRequest, ChatMessage, ChatRequest, MessagePart, PromptRequest, Role};
pub use prompt::{InlineImage, ResolvedPrompt};
