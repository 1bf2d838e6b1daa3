//! Per-channel expression weights and their first-order smoothing.

use std::collections::BTreeMap;

use serde::Serialize;

/// Default smoothing rate per render tick.
pub const SMOOTHING_RATE: f32 = 0.1;

/// Floor applied to the speaking channel while the user talks.
pub const SPEAKING_FLOOR: f32 = 0.15;

/// Current weight of every expression control channel, each in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExpressionVector {
    weights: BTreeMap<String, f32>,
}

impl ExpressionVector {
    /// A vector with every channel at rest (0).
    pub fn with_channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            weights: channels.into_iter().map(|c| (c.into(), 0.0)).collect(),
        }
    }

    pub fn get(&self, channel: &str) -> Option<f32> {
        self.weights.get(channel).copied()
    }

    pub fn set(&mut self, channel: &str, weight: f32) {
        if let Some(w) = self.weights.get_mut(channel) {
            *w = weight.clamp(0.0, 1.0);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Advance every channel one tick toward its target: `v += (target - v) * rate`.
    ///
    /// Channels without a target move toward 0. Targets for unknown channels are ignored.
    pub fn smooth_toward(&mut self, targets: &BTreeMap<String, f32>, rate: f32) {
        let rate = rate.clamp(0.0, 1.0);
        for (channel, v) in self.weights.iter_mut() {
            let target = targets.get(channel).copied().unwrap_or(0.0);
            *v += (target - *v) * rate;
        }
    }
}

/// Targets with the speaking floor raised on `channel`: `max(target, floor)`.
pub fn with_speaking_floor(
    targets: &BTreeMap<String, f32>,
    channel: &str,
    floor: f32,
) -> BTreeMap<String, f32> {
    let mut out = targets.clone();
    let slot = out.entry(channel.to_owned()).or_insert(0.0);
    *slot = slot.max(floor);
    out
}
