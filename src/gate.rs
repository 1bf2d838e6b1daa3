//! The exclusive-use token shared by both inference paths.
//!
//! At most one classifier invocation may be in flight per session. The token is deliberately
//! not a fair queue: whoever calls [`InferenceGate::try_acquire`] first after a release wins,
//! so sustained audio retries can starve the text queue and vice versa.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cloneable handle to a single exclusive-use token.
#[derive(Debug, Clone, Default)]
pub struct InferenceGate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    busy: AtomicBool,
    released: Notify,
}

impl InferenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the token if it is free. Never waits.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit {
                gate: self.clone(),
            })
    }

    /// Whether an invocation currently holds the token.
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Resolve after the next release.
    ///
    /// A release that happens while nobody waits is remembered for one waiter, so a drain loop
    /// that checks the queue and then waits cannot miss it.
    pub async fn released(&self) {
        self.inner.released.notified().await;
    }
}

/// Proof of holding the token. Dropping it releases the token on every path: success,
/// error, or cancellation of the owning task.
#[derive(Debug)]
pub struct GatePermit {
    gate: InferenceGate,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.inner.busy.store(false, Ordering::Release);
        self.gate.inner.released.notify_one();
    }
}
