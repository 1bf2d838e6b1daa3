//! `empath`: real-time emotion sensing that drives a reactive character.
//!
//! This crate provides:
//! - Fixed-window audio framing and transcript segmentation
//! - A single shared inference gate for the audio and text classifiers
//! - Confidence-gated fusion into a persistent `(emotion, sentiment)` state
//! - A reactive engine mapping that state to smoothed expressions and one-shot gestures
//!
//! Models, the speech-to-text service and the renderer are collaborators behind traits, so the
//! library can be driven by a live capture loop, a WAV replay or a test harness alike.

// High-level API (most consumers should start here).
pub mod opts;
pub mod session;

// Label sets, predictions and fused state.
pub mod labels;
pub mod state;

// Input paths.
pub mod audio_path;
pub mod framer;
pub mod gate;
pub mod segmenter;
pub mod text_queue;

// Models and the adapters around them.
pub mod classifier;
pub mod model;
pub mod models;

// Character behavior.
pub mod engine;
pub mod expression;
pub mod gesture;
pub mod profile;

// Collaborators and observability.
pub mod console;
pub mod transport;
pub mod wav;

mod error;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use error::{Error, Result};
pub use labels::{Emotion, LabelSet, Prediction, Sentiment};
pub use opts::Opts;
pub use profile::CharacterProfile;
pub use session::{CaptureFormat, RenderTarget, Session, SessionBuilder};
pub use state::FusedState;
