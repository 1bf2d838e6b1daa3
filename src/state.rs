//! Confidence-gated fusion of classifier output into the persistent `(emotion, sentiment)` pair.

use serde::Serialize;

use crate::labels::{Emotion, Prediction, Sentiment};

/// Minimum confidence (exclusive) for a prediction to overwrite its field.
///
/// Every inference produces a result; only confident ones are allowed to move the displayed
/// state, which keeps single noisy frames from making the character flap.
pub const CONFIDENCE_THRESHOLD: f32 = 0.60;

/// The persistent state driving the character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FusedState {
    pub emotion: Emotion,
    pub sentiment: Sentiment,
}

/// A prediction routed to the field it targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateUpdate {
    Emotion(Prediction<Emotion>),
    Sentiment(Prediction<Sentiment>),
}

impl StateUpdate {
    pub fn confidence(&self) -> f32 {
        match self {
            StateUpdate::Emotion(p) => p.confidence,
            StateUpdate::Sentiment(p) => p.confidence,
        }
    }
}

impl From<Prediction<Emotion>> for StateUpdate {
    fn from(p: Prediction<Emotion>) -> Self {
        StateUpdate::Emotion(p)
    }
}

impl From<Prediction<Sentiment>> for StateUpdate {
    fn from(p: Prediction<Sentiment>) -> Self {
        StateUpdate::Sentiment(p)
    }
}

/// What [`FusedState::fuse`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuseOutcome {
    /// Confidence was at or below the threshold; nothing was written.
    Rejected,
    /// Accepted, but the field already held that label.
    Unchanged,
    /// Accepted and the field changed.
    Changed,
}

impl FuseOutcome {
    pub fn accepted(self) -> bool {
        !matches!(self, FuseOutcome::Rejected)
    }
}

impl FusedState {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn new(emotion: Emotion, sentiment: Sentiment) -> Self {
        Self { emotion, sentiment }
    }

    /// Merge one prediction into the state if `confidence > threshold`.
    pub fn fuse(&mut self, update: &StateUpdate, threshold: f32) -> FuseOutcome {
        if !(update.confidence() > threshold) {
            return FuseOutcome::Rejected;
        }

        let changed = match *update {
            StateUpdate::Emotion(p) => replace(&mut self.emotion, p.label),
            StateUpdate::Sentiment(p) => replace(&mut self.sentiment, p.label),
        };

        if changed {
            FuseOutcome::Changed
        } else {
            FuseOutcome::Unchanged
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
