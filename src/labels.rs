//! Closed label sets produced by the two classifiers.
//!
//! The order of `ALL` is the order of the model's output logits, so it must not be changed
//! without re-exporting the models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A closed, ordered set of classifier labels.
pub trait LabelSet: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Labels in model output order.
    const ALL: &'static [Self];

    /// Position of this label in [`LabelSet::ALL`].
    fn index(self) -> usize;
}

/// Speech emotion recognized from raw audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Emotion {
    Happy,
    Fearful,
    Surprised,
    #[default]
    Neutral,
    Disgusted,
    Sad,
    Angry,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Fearful,
        Emotion::Surprised,
        Emotion::Neutral,
        Emotion::Disgusted,
        Emotion::Sad,
        Emotion::Angry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Happy => "Happy",
            Emotion::Fearful => "Fearful",
            Emotion::Surprised => "Surprised",
            Emotion::Neutral => "Neutral",
            Emotion::Disgusted => "Disgusted",
            Emotion::Sad => "Sad",
            Emotion::Angry => "Angry",
        }
    }
}

impl LabelSet for Emotion {
    const ALL: &'static [Self] = &Emotion::ALL;

    fn index(self) -> usize {
        self as usize
    }
}

/// Directed sentiment of a transcribed utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Sentiment {
    #[default]
    Neutral,
    Positive,
    Negative,
}

impl Sentiment {
    pub const ALL: [Sentiment; 3] = [Sentiment::Neutral, Sentiment::Positive, Sentiment::Negative];

    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Neutral => "Neutral",
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
        }
    }
}

impl LabelSet for Sentiment {
    const ALL: &'static [Self] = &Sentiment::ALL;

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::msg(format!("unknown emotion '{s}'")))
    }
}

impl FromStr for Sentiment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Sentiment::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::msg(format!("unknown sentiment '{s}'")))
    }
}

/// A single classifier decision: the arg-max label and its softmax probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction<L> {
    pub label: L,
    /// Probability in `[0, 1]`.
    pub confidence: f32,
}

impl<L> Prediction<L> {
    pub fn new(label: L, confidence: f32) -> Self {
        Self { label, confidence }
    }
}
