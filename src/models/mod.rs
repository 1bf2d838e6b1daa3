//! Concrete model backends.
//!
//! The pipeline only depends on the traits in [`crate::model`]; backends live here behind
//! feature flags so library users who bring their own models don't pay for them.

#[cfg(feature = "onnx")]
pub mod onnx;
