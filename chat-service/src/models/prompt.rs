/// Image bytes sent inline with a prompt, or returned by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// What the model is actually asked: plain text, or one image plus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPrompt {
    Text(String),
    Multimodal { image: InlineImage, text: String },
}

impl ResolvedPrompt {
    pub fn text(&self) -> &str {
        match self {
            ResolvedPrompt::Text(text) => text,
            ResolvedPrompt::Multimodal { text, .. } => text,
        }
    }

    pub fn image(&self) -> Option<&InlineImage> {
        match self {
            ResolvedPrompt::Text(_) => None,
            ResolvedPrompt::Multimodal { image, .. } => Some(image),
        }
    }
}
