//! Fixed-window audio framing for the emotion path.
//!
//! Responsibilities:
//! - Downmix interleaved capture chunks to mono
//! - Accumulate mono samples in an append-only buffer
//! - Emit non-overlapping windows of exactly [`FRAME_SAMPLES`] samples
//!
//! Notes:
//! - `push` runs inside the capture callback, so it never blocks and never runs inference.
//! - Samples beyond a full window stay buffered for the next one; nothing is dropped.
//! - A chunk may end mid-frame; the leftover interleaved samples are held until the rest of
//!   that frame arrives.

use crate::{Error, Result};

/// Capture sample rate (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per emitted frame: 2.0 s at [`SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = 32_000;

/// One window of mono audio handed to the audio classifier.
///
/// Frames are move-only so each one is consumed exactly once.
#[derive(Debug, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    /// Wrap mono samples as a frame. The classifier rejects frames whose length is not
    /// [`FRAME_SAMPLES`].
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Slices a continuous capture stream into fixed-length frames.
#[derive(Debug)]
pub struct Framer {
    frame_len: usize,
    // Mono samples waiting for a full window.
    buffer: Vec<f32>,
    // Interleaved samples of an incomplete multi-channel frame.
    carry: Vec<f32>,
}

/// Creates a framer producing [`FRAME_SAMPLES`]-sample windows.
impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self::with_frame_len(FRAME_SAMPLES)
    }

    /// Create a framer with a custom window length (mainly useful for tests and tooling).
    pub fn with_frame_len(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            buffer: Vec::with_capacity(frame_len.max(1) * 2),
            carry: Vec::new(),
        }
    }

    /// Push an interleaved capture chunk and emit every complete frame, oldest first.
    pub fn push(
        &mut self,
        interleaved: &[f32],
        channels: usize,
        mut emit: impl FnMut(AudioFrame),
    ) -> Result<()> {
        if channels == 0 {
            return Err(Error::msg("capture chunk had zero channels"));
        }

        if channels == 1 {
            self.buffer.extend_from_slice(interleaved);
        } else {
            let mut rest = interleaved;
            if !self.carry.is_empty() {
                let need = channels.saturating_sub(self.carry.len()).min(rest.len());
                self.carry.extend_from_slice(&rest[..need]);
                rest = &rest[need..];
                if self.carry.len() < channels {
                    return Ok(());
                }
                self.buffer.extend(downmix_to_mono(&self.carry, channels));
                self.carry.clear();
            }

            let whole = rest.len() - rest.len() % channels;
            self.buffer.extend(downmix_to_mono(&rest[..whole], channels));
            self.carry.extend_from_slice(&rest[whole..]);
        }

        while self.buffer.len() >= self.frame_len {
            let window: Vec<f32> = self.buffer.drain(..self.frame_len).collect();
            emit(AudioFrame::new(window));
        }

        Ok(())
    }

    /// Number of mono samples waiting for the next window.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partially accumulated window.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.carry.clear();
    }
}

/// Downmix interleaved samples into mono by averaging channels.
///
/// Equal-weight average across channels. Callers pass whole frames only.
fn downmix_to_mono(interleaved: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    interleaved
        .chunks_exact(channels)
        .map(move |frame| frame.iter().sum::<f32>() / channels as f32)
}
