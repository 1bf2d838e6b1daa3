//! Bounded, append-only log of user-facing pipeline events.
//!
//! Entries are also emitted as `tracing` events under the `empath::console` target, so a
//! subscriber sees them alongside the rest of the diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Number of entries kept when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Emotion,
    Sentiment,
    Transcription,
    Info,
    Error,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            LogCategory::Emotion => "emotion",
            LogCategory::Sentiment => "sentiment",
            LogCategory::Transcription => "transcription",
            LogCategory::Info => "info",
            LogCategory::Error => "error",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub category: LogCategory,
}

/// Cloneable handle to a shared ring buffer of [`LogEntry`] values.
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    inner: Arc<Mutex<Ring>>,
}

#[derive(Debug)]
struct Ring {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log retaining at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Ring {
                capacity,
                entries: VecDeque::with_capacity(capacity),
            })),
        }
    }

    pub fn push(&self, category: LogCategory, message: impl Into<String>) {
        let message = message.into();
        match category {
            LogCategory::Error => {
                tracing::warn!(target: "empath::console", category = %category, "{message}")
            }
            _ => tracing::info!(target: "empath::console", category = %category, "{message}"),
        }

        let mut ring = self.lock();
        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(LogEntry { message, category });
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let log = ConsoleLog::with_capacity(3);
        for i in 0..5 {
            log.push(LogCategory::Info, format!("entry {i}"));
        }
        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn clones_share_the_buffer() {
        let log = ConsoleLog::new();
        let other = log.clone();
        other.push(LogCategory::Emotion, "Predicted emotion: Happy");
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].category, LogCategory::Emotion);
        assert_eq!(log.capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn serializes_category_in_lowercase() -> anyhow::Result<()> {
        let entry = LogEntry {
            message: "hi".into(),
            category: LogCategory::Transcription,
        };
        let json = serde_json::to_string(&entry)?;
        assert_eq!(json, r#"{"message":"hi","category":"transcription"}"#);
        Ok(())
    }
}
