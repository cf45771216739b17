//! Mock model client for testing.

use super::{GeneratedContent, GeneratedPart, ModelClient, ProviderError, TextStream};
use crate::models::{InlineImage, ResolvedPrompt};
use async_trait::async_trait;
use std::sync::Mutex;

/// Scripted model: returns fixed fragments and, optionally, one image.
/// Every call is recorded as `(model, prompt)`.
pub struct MockModelClient {
    fragments: Vec<String>,
    image: Option<InlineImage>,
    failure: Option<String>,
    fail_mid_stream: bool,
    calls: Mutex<Vec<(String, ResolvedPrompt)>>,
}

impl Default for MockModelClient {
    fn default() -> Self {
        Self::new(["Mock", " response"])
    }
}

impl MockModelClient {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            image: None,
            failure: None,
            fail_mid_stream: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Include an image part in `generate_image` responses.
    pub fn with_image(mut self, data: &[u8], mime_type: &str) -> Self {
        self.image = Some(InlineImage {
            data: data.to_vec(),
            mime_type: mime_type.to_string(),
        });
        self
    }

    /// Fail every call with an API error carrying `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Let streams yield their fragments, then end with an error.
    pub fn failing_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    pub fn calls(&self) -> Vec<(String, ResolvedPrompt)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn record(&self, model: &str, prompt: &ResolvedPrompt) -> Result<(), ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((model.to_string(), prompt.clone()));
        }

        match &self.failure {
            Some(message) => Err(ProviderError::ApiError(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<String, ProviderError> {
        self.record(model, prompt)?;
        Ok(self.fragments.concat())
    }

    async fn generate_stream(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<TextStream, ProviderError> {
        self.record(model, prompt)?;

        let mut chunks: Vec<Result<String, ProviderError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if self.fail_mid_stream {
            chunks.push(Err(ProviderError::NetworkError(
                "connection reset".to_string(),
            )));
        }

        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn generate_image(
        &self,
        model: &str,
        prompt: &ResolvedPrompt,
    ) -> Result<GeneratedContent, ProviderError> {
        self.record(model, prompt)?;

        let mut parts = vec![GeneratedPart::Text(self.fragments.concat())];
        if let Some(image) = &self.image {
            parts.push(GeneratedPart::Image(image.clone()));
        }
        Ok(GeneratedContent { parts })
    }
}
