//! Connectivity gate in front of the external speech-to-text service.
//!
//! The service itself is a collaborator; this module only tracks whether its socket is open,
//! refuses to forward audio while it is not, and keeps an open socket alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Interval between keepalive messages on an open link.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Outbound half of a streaming transcription connection.
///
/// Implementations push bytes onto their socket; transcript fragments travel back through
/// [`crate::Session::push_transcript`].
pub trait TranscriptionTransport: Send + Sync {
    fn send_audio(&self, audio: &[u8]) -> Result<()>;

    /// Send the service's keepalive message.
    fn keep_alive(&self) -> Result<()>;

    fn close(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Open,
}

/// Tracks the open/closed state of a [`TranscriptionTransport`] and owns its keepalive task.
pub struct TranscriptionLink {
    transport: Arc<dyn TranscriptionTransport>,
    open: Arc<AtomicBool>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl TranscriptionLink {
    pub fn new(transport: Arc<dyn TranscriptionTransport>) -> Self {
        Self {
            transport,
            open: Arc::new(AtomicBool::new(false)),
            keepalive: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LinkState {
        if self.open.load(Ordering::Acquire) {
            LinkState::Open
        } else {
            LinkState::Closed
        }
    }

    /// Mark the socket open and start sending keepalives every `interval` until it closes or
    /// `cancel` fires. Must be called from within a tokio runtime.
    pub fn mark_open(&self, interval: Duration, cancel: CancellationToken) {
        self.open.store(true, Ordering::Release);
        let task = spawn_keepalive(
            Arc::clone(&self.transport),
            Arc::clone(&self.open),
            interval,
            cancel,
        );
        if let Some(prev) = self.slot().replace(task) {
            prev.abort();
        }
        debug!("transcription link open");
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(task) = self.slot().take() {
            task.abort();
        }
        debug!("transcription link closed");
    }

    /// Forward capture audio to the service. Fails with [`Error::TransportNotReady`] (and the
    /// audio is dropped) unless the link is open.
    pub fn forward_audio(&self, audio: &[u8]) -> Result<()> {
        if self.state() != LinkState::Open {
            return Err(Error::TransportNotReady(format!(
                "dropped {} bytes of audio while the socket is closed",
                audio.len()
            )));
        }
        self.transport.send_audio(audio)
    }

    /// Close the link and the underlying transport.
    pub fn close(&self) {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        if let Some(task) = self.slot().take() {
            task.abort();
        }
        if was_open {
            self.transport.close();
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.keepalive.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TranscriptionLink {
    fn drop(&mut self) {
        if let Some(task) = self.slot().take() {
            task.abort();
        }
    }
}

/// Send a keepalive every `interval` while `open` holds, until `cancel` fires.
pub fn spawn_keepalive(
    transport: Arc<dyn TranscriptionTransport>,
    open: Arc<AtomicBool>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of `interval` completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !open.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(err) = transport.keep_alive() {
                        warn!(error = %err, "transcription keepalive failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recording {
        sent: AtomicUsize,
        keepalives: AtomicUsize,
        closed: AtomicBool,
    }

    impl TranscriptionTransport for Recording {
        fn send_audio(&self, audio: &[u8]) -> Result<()> {
            self.sent.fetch_add(audio.len(), Ordering::SeqCst);
            Ok(())
        }

        fn keep_alive(&self) -> Result<()> {
            self.keepalives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn closed_link_drops_audio() {
        let transport = Arc::new(Recording::default());
        let link = TranscriptionLink::new(transport.clone());

        let err = link.forward_audio(&[0; 8]).unwrap_err();
        assert!(matches!(err, Error::TransportNotReady(_)));
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);

        link.mark_open(KEEPALIVE_INTERVAL, CancellationToken::new());
        link.forward_audio(&[0; 8]).expect("open link forwards audio");
        assert_eq!(transport.sent.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_runs_only_while_open() {
        let transport = Arc::new(Recording::default());
        let link = TranscriptionLink::new(transport.clone());
        link.mark_open(KEEPALIVE_INTERVAL, CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(transport.keepalives.load(Ordering::SeqCst), 2);

        link.mark_closed();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.keepalives.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_shuts_the_transport_once() {
        let transport = Arc::new(Recording::default());
        let link = TranscriptionLink::new(transport.clone());
        link.close();
        assert!(!transport.closed.load(Ordering::SeqCst));

        link.mark_open(KEEPALIVE_INTERVAL, CancellationToken::new());
        link.close();
        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(link.state(), LinkState::Closed);
    }
}
