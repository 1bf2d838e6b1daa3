//! FIFO of completed transcript segments waiting for the sentiment classifier.
//!
//! Unbounded and ordered by arrival. A single drain loop pops from the front; producers push
//! to the back and wake the drainer.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct TextQueue {
    pending: Mutex<VecDeque<String>>,
    arrived: Notify,
}

impl TextQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment and wake the drainer.
    pub fn push(&self, segment: String) {
        self.lock().push_back(segment);
        self.arrived.notify_one();
    }

    /// Remove the oldest segment.
    pub fn pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every pending segment, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut pending = self.lock();
        let cleared = pending.len();
        pending.clear();
        cleared
    }

    /// Resolve after the next push (or immediately if a push happened while nobody waited).
    pub async fn arrived(&self) {
        self.arrived.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
