//! HTTP handlers for the chat service.

pub mod chat;
pub mod health;
pub mod secrets;

pub use chat::{chat_blurb, chat_image, ImageResponse};
pub use health::health_check;
pub use secrets::{secret_check, SecretMessage};
