//! chat-service: bridges chat requests to Gemini and generated images to object storage.
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
