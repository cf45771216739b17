//! Generative model abstractions and implementations.
//!
//! Handlers only see [`ModelClient`]; the Gemini backend and the mock are
//! interchangeable behind it.

pub mod gemini;
pub mod mock;

use crate::models::{InlineImage, ResolvedPrompt};
use async_trait::async_trait;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Content filtered")]
    ContentFiltered,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Model returned no content")]
    EmptyResponse,
}

/// Finite, ordered stream of generated text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// One part of a multimodal model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedPart {
    Text(String),
    Image(InlineImage),
}

/// Parts of the first candidate, in the order the model produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedContent {
    pub parts: Vec<GeneratedPart>,
}

impl GeneratedContent {
    /// Take the first inline image, if the model produced one.
    pub fn into_first_image(self) -> Option<InlineImage> {
        self.parts.into_iter().find_map(|part| match part {
            GeneratedPart::Image(image) => Some(image),
            GeneratedPart::Text(_) => None,
        })
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                GeneratedPart::Text(text) => Some(text.as_str()),
                GeneratedPart::Image(_) => None,
            })
            .collect()
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate a complete text response.
    async fn generate(&self, model: &str, prompt: &ResolvedPrompt)
        -> Result<String, ProviderError>;

    /// Generate a text response as it is produced.
    async fn generate_stream(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<TextStream, ProviderError>;

    /// Generate a response that may include images alongside text.
    async fn generate_image(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<GeneratedContent, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_image_skips_leading_text() {
        let image = InlineImage {
            data: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
        };
        let content = GeneratedContent {
            parts: vec![
                GeneratedPart::Text("Here you go".to_string()),
                GeneratedPart::Image(image.clone()),
                GeneratedPart::Image(InlineImage {
                    data: vec![9],
                    mime_type: "image/jpeg".to_string(),
                }),
            ],
        };

        assert_eq!(content.text(), "Here you go");
        assert_eq!(content.into_first_image(), Some(image));
    }

    #[test]
    fn text_only_content_has_no_image() {
        let content = GeneratedContent {
            parts: vec![GeneratedPart::Text("no picture".to_string())],
        };
        assert!(content.into_first_image().is_none());
    }
}
