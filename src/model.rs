use crate::Result;

/// Opaque speech-emotion model.
///
/// A model turns one z-score normalized mono frame into one logit per
/// [`crate::Emotion`] label, in [`crate::Emotion::ALL`] order.
///
/// Implementations may be slow; callers run them off the async executor.
pub trait EmotionModel: Send {
    fn run(&mut self, normalized: &[f32]) -> Result<Vec<f32>>;
}

/// Opaque directed-sentiment model.
///
/// Produces one logit per [`crate::Sentiment`] label, in [`crate::Sentiment::ALL`] order.
pub trait SentimentModel: Send {
    fn run(&mut self, tokens: &TokenizedText) -> Result<Vec<f32>>;
}

/// Text tokenizer collaborator (padding and truncation are the tokenizer's concern).
pub trait Tokenizer: Send {
    fn tokenize(&mut self, text: &str) -> Result<TokenizedText>;
}

/// Token ids and the matching attention mask for a single sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizedText {
    pub ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl TokenizedText {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<F> EmotionModel for F
where
    F: FnMut(&[f32]) -> Result<Vec<f32>> + Send,
{
    fn run(&mut self, normalized: &[f32]) -> Result<Vec<f32>> {
        self(normalized)
    }
}

impl<F> SentimentModel for F
where
    F: FnMut(&TokenizedText) -> Result<Vec<f32>> + Send,
{
    fn run(&mut self, tokens: &TokenizedText) -> Result<Vec<f32>> {
        self(tokens)
    }
}
