//! ONNX Runtime backends for the emotion and sentiment models, plus a HuggingFace tokenizer.

use std::collections::HashMap;
use std::path::Path;

use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::Tensor;
use tokenizers::{PaddingParams, TruncationParams};
use tracing::info;

use crate::model::{EmotionModel, SentimentModel, TokenizedText, Tokenizer};
use crate::{Error, Result};

/// Longest token sequence handed to the sentiment model.
pub const MAX_SEQUENCE_LEN: usize = 512;

fn load_session(path: &Path, what: &str) -> Result<Session> {
    info!(model = what, path = %path.display(), "loading ONNX model");
    Session::builder()
        .and_then(|b| b.commit_from_file(path))
        .map_err(|e| {
            Error::MissingResource(format!(
                "failed to load {what} model '{}': {e}",
                path.display()
            ))
        })
}

/// Speech-emotion classifier: `input_values` `[1, 32000]` f32 in, 7 logits out.
pub struct OnnxEmotionModel {
    session: Session,
}

impl OnnxEmotionModel {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            session: load_session(path.as_ref(), "emotion")?,
        })
    }
}

impl EmotionModel for OnnxEmotionModel {
    fn run(&mut self, normalized: &[f32]) -> Result<Vec<f32>> {
        let input = Tensor::from_array(([1_usize, normalized.len()], normalized.to_vec()))
            .map_err(|e| Error::inference(format!("failed to create input_values tensor: {e}")))?;

        let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
        feed.insert("input_values".to_string(), input.into());

        let outputs = self
            .session
            .run(SessionInputs::from(feed))
            .map_err(|e| Error::inference(format!("emotion model run failed: {e}")))?;

        let (_shape, logits) = outputs[0_usize]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::inference(format!("failed to extract emotion logits: {e}")))?;
        Ok(logits.to_vec())
    }
}

/// Directed-sentiment classifier: `input_ids` and `attention_mask` `[1, seq]` i64 in,
/// 3 logits out.
pub struct OnnxSentimentModel {
    session: Session,
}

impl OnnxSentimentModel {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            session: load_session(path.as_ref(), "sentiment")?,
        })
    }
}

impl SentimentModel for OnnxSentimentModel {
    fn run(&mut self, tokens: &TokenizedText) -> Result<Vec<f32>> {
        if tokens.is_empty() {
            return Err(Error::inference("empty token sequence"));
        }
        let seq_len = tokens.len();

        let input_ids = Tensor::from_array(([1_usize, seq_len], tokens.ids.clone()))
            .map_err(|e| Error::inference(format!("failed to create input_ids tensor: {e}")))?;
        let attention_mask = Tensor::from_array(([1_usize, seq_len], tokens.attention_mask.clone()))
            .map_err(|e| Error::inference(format!("failed to create attention_mask tensor: {e}")))?;

        let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
        feed.insert("input_ids".to_string(), input_ids.into());
        feed.insert("attention_mask".to_string(), attention_mask.into());

        let outputs = self
            .session
            .run(SessionInputs::from(feed))
            .map_err(|e| Error::inference(format!("sentiment model run failed: {e}")))?;

        let (_shape, logits) = outputs[0_usize]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::inference(format!("failed to extract sentiment logits: {e}")))?;
        Ok(logits.to_vec())
    }
}

/// `tokenizer.json` loaded with the `tokenizers` crate, truncating to [`MAX_SEQUENCE_LEN`].
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            Error::MissingResource(format!("failed to load tokenizer '{}': {e}", path.display()))
        })?;

        inner
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LEN,
                ..Default::default()
            }))
            .map_err(|e| Error::msg(format!("invalid truncation settings: {e}")))?;
        inner.with_padding(Some(PaddingParams::default()));

        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn tokenize(&mut self, text: &str) -> Result<TokenizedText> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| Error::inference(format!("tokenization failed: {e}")))?;

        Ok(TokenizedText {
            ids: encoding.get_ids().iter().map(|&id| i64::from(id)).collect(),
            attention_mask: encoding
                .get_attention_mask()
                .iter()
                .map(|&m| i64::from(m))
                .collect(),
        })
    }
}
