//! Thin adapters over the opaque models.
//!
//! Each adapter normalizes its input, invokes the model on the blocking pool, and decodes
//! logits into a [`Prediction`] with a max-subtraction softmax. Adapters keep no state between
//! calls besides the model itself.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::framer::{AudioFrame, FRAME_SAMPLES};
use crate::labels::{Emotion, LabelSet, Prediction, Sentiment};
use crate::model::{EmotionModel, SentimentModel, Tokenizer};
use crate::{Error, Result};

/// Added to the standard deviation so silent frames don't divide by zero.
const ZSCORE_EPSILON: f32 = 1e-5;

/// A decoded prediction together with how long the model call took.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified<L> {
    pub prediction: Prediction<L>,
    pub latency: Duration,
}

/// Audio → [`Emotion`] adapter.
#[derive(Clone)]
pub struct AudioClassifier {
    model: Arc<Mutex<Box<dyn EmotionModel>>>,
}

impl AudioClassifier {
    pub fn new(model: impl EmotionModel + 'static) -> Self {
        Self {
            model: Arc::new(Mutex::new(Box::new(model))),
        }
    }

    /// Classify one frame.
    ///
    /// Frames that are not exactly [`FRAME_SAMPLES`] long are rejected with `Ok(None)`.
    pub async fn classify(&self, frame: AudioFrame) -> Result<Option<Classified<Emotion>>> {
        if frame.len() != FRAME_SAMPLES {
            debug!(len = frame.len(), "rejecting audio frame with unexpected length");
            return Ok(None);
        }

        let model = Arc::clone(&self.model);
        let (logits, latency) = tokio::task::spawn_blocking(move || -> Result<_> {
            let normalized = zscore(frame.samples());
            let mut model = model.lock().unwrap_or_else(PoisonError::into_inner);
            let start = Instant::now();
            let logits = model.run(&normalized)?;
            Ok((logits, start.elapsed()))
        })
        .await
        .map_err(|err| Error::inference(format!("emotion model task failed: {err}")))??;

        let prediction = decode_logits::<Emotion>(&logits)?;
        debug!(
            latency_ms = latency.as_secs_f64() * 1000.0,
            label = %prediction.label,
            confidence = prediction.confidence,
            "emotion inference completed"
        );
        Ok(Some(Classified {
            prediction,
            latency,
        }))
    }
}

struct TextModels {
    tokenizer: Box<dyn Tokenizer>,
    model: Box<dyn SentimentModel>,
}

/// Text → [`Sentiment`] adapter.
#[derive(Clone)]
pub struct TextClassifier {
    inner: Arc<Mutex<TextModels>>,
}

impl TextClassifier {
    pub fn new(tokenizer: impl Tokenizer + 'static, model: impl SentimentModel + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TextModels {
                tokenizer: Box::new(tokenizer),
                model: Box::new(model),
            })),
        }
    }

    /// Classify one transcript segment. Latency covers tokenization and the model call.
    pub async fn classify(&self, text: String) -> Result<Classified<Sentiment>> {
        let inner = Arc::clone(&self.inner);
        let (logits, latency) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
            let TextModels { tokenizer, model } = &mut *guard;
            let start = Instant::now();
            let tokens = tokenizer.tokenize(&text)?;
            let logits = model.run(&tokens)?;
            Ok((logits, start.elapsed()))
        })
        .await
        .map_err(|err| Error::inference(format!("sentiment model task failed: {err}")))??;

        let prediction = decode_logits::<Sentiment>(&logits)?;
        debug!(
            latency_ms = latency.as_secs_f64() * 1000.0,
            label = %prediction.label,
            confidence = prediction.confidence,
            "sentiment inference completed"
        );
        Ok(Classified {
            prediction,
            latency,
        })
    }
}

/// Z-score normalize a frame: `(x - mean) / (std + 1e-5)` with the population std.
pub fn zscore(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let variance = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
    let denom = variance.sqrt() + ZSCORE_EPSILON;

    samples.iter().map(|x| (x - mean) / denom).collect()
}

/// Numerically stable softmax (the max logit is subtracted before exponentiating).
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }

    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Decode logits into the arg-max label and its probability.
///
/// Ties resolve to the first label in model order. A logit count that does not match the label
/// set is an inference error.
pub fn decode_logits<L: LabelSet>(logits: &[f32]) -> Result<Prediction<L>> {
    if logits.len() != L::ALL.len() {
        return Err(Error::inference(format!(
            "model produced {} logits, expected {}",
            logits.len(),
            L::ALL.len()
        )));
    }

    let probs = softmax(logits);
    let mut best = 0usize;
    for (i, &p) in probs.iter().enumerate() {
        if p > probs[best] {
            best = i;
        }
    }

    Ok(Prediction::new(L::ALL[best], probs[best]))
}
