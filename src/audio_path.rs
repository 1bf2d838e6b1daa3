//! Busy-retry delivery of audio frames through the inference gate.
//!
//! Frames are never queued. A delivery that finds the gate held sleeps for the retry interval
//! and checks again, so under contention whichever delivery happens to poll first after a
//! release wins the token.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::gate::{GatePermit, InferenceGate};
use crate::opts::Opts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` retries until the gate is acquired or the delivery is cancelled.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn from_opts(opts: &Opts) -> Self {
        Self {
            interval: opts.audio_retry_interval,
            max_retries: opts.audio_max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_opts(&Opts::default())
    }
}

#[derive(Debug)]
pub enum Delivery {
    /// The gate was acquired after `retries` busy attempts.
    Acquired { permit: GatePermit, retries: u32 },
    /// The session was torn down while waiting.
    Cancelled,
    /// `max_retries` was exhausted.
    GaveUp { retries: u32 },
}

/// Acquire `gate`, retrying every `policy.interval` while it is held.
pub async fn acquire_with_retry(
    gate: &InferenceGate,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Delivery {
    let mut retries = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Delivery::Cancelled;
        }
        if let Some(permit) = gate.try_acquire() {
            return Delivery::Acquired { permit, retries };
        }
        if policy.max_retries.is_some_and(|max| retries >= max) {
            return Delivery::GaveUp { retries };
        }

        trace!(retries, "inference gate busy; retrying audio delivery");
        tokio::select! {
            _ = cancel.cancelled() => return Delivery::Cancelled,
            _ = tokio::time::sleep(policy.interval) => {}
        }
        retries += 1;
    }
}
