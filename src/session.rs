//! One capture stream driving one reactive character.
//!
//! A [`Session`] wires the pieces together: capture chunks flow through the framer into
//! per-frame audio deliveries, transcript fragments flow through the segmenter into the text
//! queue and its drain task, and both paths share one [`InferenceGate`]. Accepted predictions
//! land in the [`ReactiveEngine`], which the host advances once per render tick.
//!
//! All background work runs on the ambient tokio runtime and is tied to the session's
//! cancellation token, so [`Session::shutdown`] can tear everything down synchronously.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::audio_path::{Delivery, RetryPolicy, acquire_with_retry};
use crate::classifier::{AudioClassifier, Classified, TextClassifier};
use crate::console::{ConsoleLog, LogCategory};
use crate::engine::{DecayArm, Frame, ReactiveEngine};
use crate::expression::ExpressionVector;
use crate::framer::{AudioFrame, Framer, SAMPLE_RATE};
use crate::gate::InferenceGate;
use crate::gesture::AnimationCommand;
use crate::labels::{Emotion, Prediction};
use crate::model::{EmotionModel, SentimentModel, Tokenizer};
use crate::opts::Opts;
use crate::profile::CharacterProfile;
use crate::segmenter::Segmenter;
use crate::state::{FusedState, StateUpdate};
use crate::text_queue::TextQueue;
use crate::transport::{LinkState, TranscriptionLink, TranscriptionTransport};
use crate::{Error, Result};

/// The rig and animation system the session drives.
pub trait RenderTarget {
    /// Called once per tick with the smoothed weight of every channel.
    fn apply_expression(&mut self, expression: &ExpressionVector);

    /// Play `clip` once at `time_scale`. Completion is reported back via
    /// [`Session::clip_finished`].
    fn play_once(&mut self, clip: &str, time_scale: f32);

    fn resume_idle(&mut self);
}

/// Shape of the capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

impl CaptureFormat {
    pub fn mono() -> Self {
        Self {
            channels: 1,
            sample_rate: SAMPLE_RATE,
        }
    }

    pub fn stereo() -> Self {
        Self {
            channels: 2,
            sample_rate: SAMPLE_RATE,
        }
    }
}

pub struct SessionBuilder {
    profile: CharacterProfile,
    opts: Opts,
    console: Option<ConsoleLog>,
    audio: Option<AudioClassifier>,
    text: Option<TextClassifier>,
    transcription: Option<Arc<dyn TranscriptionTransport>>,
}

impl SessionBuilder {
    pub fn new(profile: CharacterProfile) -> Self {
        Self {
            profile,
            opts: Opts::default(),
            console: None,
            audio: None,
            text: None,
            transcription: None,
        }
    }

    pub fn opts(mut self, opts: Opts) -> Self {
        self.opts = opts;
        self
    }

    /// Share an existing console log instead of creating one.
    pub fn console(mut self, console: ConsoleLog) -> Self {
        self.console = Some(console);
        self
    }

    pub fn emotion_model(mut self, model: impl EmotionModel + 'static) -> Self {
        self.audio = Some(AudioClassifier::new(model));
        self
    }

    pub fn sentiment_model(
        mut self,
        tokenizer: impl Tokenizer + 'static,
        model: impl SentimentModel + 'static,
    ) -> Self {
        self.text = Some(TextClassifier::new(tokenizer, model));
        self
    }

    pub fn transcription(mut self, transport: Arc<dyn TranscriptionTransport>) -> Self {
        self.transcription = Some(transport);
        self
    }

    /// Start the session: spawn the text drain task and queue the greeting gesture.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Session> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::msg("a session must be started inside a tokio runtime"));
        }

        let id = Uuid::new_v4();
        let span = info_span!("session", id = %id, character = %self.profile.name);
        let console = self
            .console
            .unwrap_or_else(|| ConsoleLog::with_capacity(self.opts.console_capacity));

        let mut engine = ReactiveEngine::new(Arc::new(self.profile), &self.opts);
        engine.greet();

        let shared = Arc::new(Shared {
            opts: self.opts,
            console,
            gate: InferenceGate::new(),
            queue: TextQueue::new(),
            cancel: CancellationToken::new(),
            engine: Mutex::new(engine),
            decay: Mutex::new(None),
            speaking: AtomicBool::new(false),
        });

        let drain = self.text.map(|classifier| {
            tokio::spawn(drain_text(Arc::clone(&shared), classifier).instrument(span.clone()))
        });

        span.in_scope(|| info!("session started"));
        shared.console.push(LogCategory::Info, "Starting session...");

        Ok(Session {
            id,
            span,
            shared,
            framer: Framer::new(),
            segmenter: Segmenter::new(),
            capture: None,
            audio: self.audio,
            drain,
            link: self.transcription.map(TranscriptionLink::new),
            closed: false,
        })
    }
}

struct Shared {
    opts: Opts,
    console: ConsoleLog,
    gate: InferenceGate,
    queue: TextQueue,
    cancel: CancellationToken,
    engine: Mutex<ReactiveEngine>,
    decay: Mutex<Option<JoinHandle<()>>>,
    speaking: AtomicBool,
}

impl Shared {
    fn engine(&self) -> MutexGuard<'_, ReactiveEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decay_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.decay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle a finished classifier call. Results arriving after shutdown are discarded.
    fn complete<L>(self: &Arc<Self>, kind: &str, category: LogCategory, result: Result<Classified<L>>)
    where
        L: Copy + Display,
        StateUpdate: From<Prediction<L>>,
    {
        if self.cancel.is_cancelled() {
            debug!(kind, "discarding result from a closed session");
            return;
        }

        let classified = match result {
            Ok(c) => c,
            Err(err) => {
                warn!(kind, error = %err, "inference failed; dropping item");
                self.console
                    .push(LogCategory::Error, format!("{kind} inference failed: {err}"));
                return;
            }
        };

        let prediction = classified.prediction;
        self.console.push(
            category,
            format!(
                "Inference completed in {:.2} ms",
                classified.latency.as_secs_f64() * 1000.0
            ),
        );
        self.console.push(
            category,
            format!(
                "Predicted {kind}: {} with {:.1}% confidence",
                prediction.label,
                prediction.confidence * 100.0
            ),
        );

        // Shutdown cancels before taking this lock, so a result that gets here after
        // teardown sees the cancellation.
        let mut engine = self.engine();
        if self.cancel.is_cancelled() {
            debug!(kind, "discarding result from a closed session");
            return;
        }
        if let Some(arm) = engine.apply(&StateUpdate::from(prediction)) {
            schedule_decay(self, arm);
        }
    }
}

/// Replace the outstanding decay timer with one for `arm`.
fn schedule_decay(shared: &Arc<Shared>, arm: DecayArm) {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let cancel = shared.cancel.clone();
    let task = tokio::spawn(
        async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(arm.delay) => {
                    if let Some(shared) = weak.upgrade() {
                        if shared.engine().expire(arm.epoch) {
                            debug!(epoch = arm.epoch, "decay timer fired");
                        }
                    }
                }
            }
        }
        .in_current_span(),
    );

    if let Some(prev) = shared.decay_slot().replace(task) {
        prev.abort();
    }
}

async fn deliver_frame(shared: Arc<Shared>, classifier: AudioClassifier, frame: AudioFrame) {
    let policy = RetryPolicy::from_opts(&shared.opts);
    let permit = match acquire_with_retry(&shared.gate, policy, &shared.cancel).await {
        Delivery::Acquired { permit, retries } => {
            if retries > 0 {
                debug!(retries, "audio frame delivered after busy retries");
            }
            permit
        }
        Delivery::Cancelled => return,
        Delivery::GaveUp { retries } => {
            warn!(retries, "inference gate stayed busy; dropping audio frame");
            return;
        }
    };

    let result = tokio::select! {
        _ = shared.cancel.cancelled() => return,
        r = classifier.classify(frame) => r,
    };

    match result {
        Ok(Some(classified)) => shared.complete("emotion", LogCategory::Emotion, Ok(classified)),
        Ok(None) => {}
        Err(err) => shared.complete::<Emotion>("emotion", LogCategory::Emotion, Err(err)),
    }
    drop(permit);
}

/// Drain the text queue for the lifetime of the session.
///
/// Each step needs both a pending segment and a free gate; otherwise it waits for whichever
/// of "segment arrived" or "gate released" happens next.
async fn drain_text(shared: Arc<Shared>, classifier: TextClassifier) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        if !shared.queue.is_empty() {
            if let Some(permit) = shared.gate.try_acquire() {
                if let Some(segment) = shared.queue.pop() {
                    debug!(pending = shared.queue.len(), "classifying transcript segment");
                    let result = tokio::select! {
                        _ = shared.cancel.cancelled() => break,
                        r = classifier.classify(segment) => r,
                    };
                    shared.complete("sentiment", LogCategory::Sentiment, result);
                }
                drop(permit);
                continue;
            }
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.queue.arrived() => {}
            _ = shared.gate.released() => {}
        }
    }
    debug!("text drain stopped");
}

/// A running capture session. Dropping it shuts it down.
pub struct Session {
    id: Uuid,
    span: Span,
    shared: Arc<Shared>,
    framer: Framer,
    segmenter: Segmenter,
    capture: Option<CaptureFormat>,
    audio: Option<AudioClassifier>,
    drain: Option<JoinHandle<()>>,
    link: Option<TranscriptionLink>,
    closed: bool,
}

impl Session {
    pub fn builder(profile: CharacterProfile) -> SessionBuilder {
        SessionBuilder::new(profile)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn console(&self) -> &ConsoleLog {
        &self.shared.console
    }

    pub fn opts(&self) -> &Opts {
        &self.shared.opts
    }

    pub fn state(&self) -> FusedState {
        self.shared.engine().state()
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether a classifier invocation currently holds the inference gate.
    pub fn inference_in_flight(&self) -> bool {
        self.shared.gate.is_busy()
    }

    /// Segments waiting for the sentiment classifier.
    pub fn pending_segments(&self) -> usize {
        self.shared.queue.len()
    }

    /// Samples buffered in the framer, waiting for a full frame.
    pub fn buffered_samples(&self) -> usize {
        self.framer.buffered()
    }

    /// Open the audio path. `None` means no capture stream is available.
    ///
    /// On failure the error is logged, the audio path stays down and the state is untouched.
    pub fn start_capture(&mut self, format: Option<CaptureFormat>) -> Result<()> {
        let _enter = self.span.enter();
        let result = match format {
            None => Err(Error::MissingResource("no capture stream available".into())),
            Some(f) if f.sample_rate != SAMPLE_RATE => Err(Error::msg(format!(
                "capture must run at {SAMPLE_RATE} Hz, got {} Hz",
                f.sample_rate
            ))),
            Some(f) if !(1..=2).contains(&f.channels) => Err(Error::msg(format!(
                "capture must be mono or stereo, got {} channels",
                f.channels
            ))),
            Some(f) => Ok(f),
        };

        match result {
            Ok(format) => {
                self.capture = Some(format);
                info!(channels = format.channels, "capture started");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "capture could not be started");
                self.shared
                    .console
                    .push(LogCategory::Error, format!("Error starting capture: {err}"));
                Err(err)
            }
        }
    }

    /// Feed one interleaved capture chunk. Returns how many frames it completed.
    ///
    /// Never waits on inference: each completed frame is handed to its own delivery task.
    pub fn push_capture(&mut self, samples: &[f32]) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }
        let Some(format) = self.capture else {
            return Err(Error::MissingResource("capture has not been started".into()));
        };

        let mut frames = Vec::new();
        self.framer
            .push(samples, usize::from(format.channels), |frame| frames.push(frame))?;

        let emitted = frames.len();
        for frame in frames {
            self.dispatch_frame(frame);
        }
        Ok(emitted)
    }

    fn dispatch_frame(&self, frame: AudioFrame) {
        let _enter = self.span.enter();
        if self.shared.opts.require_speech_for_audio && !self.is_speaking() {
            debug!("ignoring audio frame while the user is silent");
            return;
        }
        let Some(classifier) = &self.audio else {
            debug!("no emotion model configured; dropping audio frame");
            return;
        };

        tokio::spawn(
            deliver_frame(Arc::clone(&self.shared), classifier.clone(), frame)
                .instrument(self.span.clone()),
        );
    }

    /// The user started talking. Clears any partial segment.
    pub fn speech_started(&mut self) {
        if self.closed {
            return;
        }
        self.shared.speaking.store(true, Ordering::Release);
        self.segmenter.speech_started();
    }

    pub fn speech_stopped(&mut self) {
        self.shared.speaking.store(false, Ordering::Release);
        self.segmenter.speech_stopped();
    }

    /// Feed one transcript fragment. Returns whether a candidate segment was queued.
    pub fn push_transcript(&mut self, fragment: &str) -> bool {
        if self.closed {
            return false;
        }
        let Some(segment) = self.segmenter.push_fragment(fragment) else {
            return false;
        };

        self.shared
            .console
            .push(LogCategory::Transcription, segment.clone());
        if self.drain.is_none() {
            let _enter = self.span.enter();
            debug!("no sentiment model configured; segment not classified");
            return false;
        }
        self.shared.queue.push(segment);
        true
    }

    /// Advance the engine one tick and push the result to `target`.
    pub fn render_tick(&mut self, target: &mut dyn RenderTarget) -> Frame {
        let frame = self.shared.engine().tick(self.is_speaking());
        target.apply_expression(&frame.expression);
        for command in &frame.commands {
            dispatch_command(target, command);
        }
        frame
    }

    /// Report a clip completion from the animation collaborator.
    pub fn clip_finished(
        &mut self,
        clip: &str,
        target: &mut dyn RenderTarget,
    ) -> Option<AnimationCommand> {
        let command = self.shared.engine().clip_finished(clip)?;
        dispatch_command(target, &command);
        Some(command)
    }

    pub fn transcription_state(&self) -> LinkState {
        self.link
            .as_ref()
            .map_or(LinkState::Closed, TranscriptionLink::state)
    }

    /// The transcription socket opened; starts the keepalive.
    pub fn transcription_opened(&self) {
        if self.closed {
            return;
        }
        if let Some(link) = &self.link {
            let _enter = self.span.enter();
            link.mark_open(self.shared.opts.keepalive_interval, self.shared.cancel.child_token());
            self.shared
                .console
                .push(LogCategory::Info, "Transcription connection opened");
        }
    }

    pub fn transcription_closed(&self) {
        if let Some(link) = &self.link {
            let _enter = self.span.enter();
            link.mark_closed();
            self.shared
                .console
                .push(LogCategory::Info, "Transcription connection closed");
        }
    }

    /// Forward capture audio to the transcription service.
    ///
    /// While the socket is closed the audio is dropped, a warning is logged and
    /// [`Error::TransportNotReady`] is returned. Nothing is retried.
    pub fn forward_transcription_audio(&self, audio: &[u8]) -> Result<()> {
        let result = match &self.link {
            Some(link) => link.forward_audio(audio),
            None => Err(Error::TransportNotReady(
                "no transcription transport configured".into(),
            )),
        };

        if let Err(err) = &result {
            let _enter = self.span.enter();
            warn!(error = %err, "transcription audio dropped");
            if matches!(err, Error::TransportNotReady(_)) {
                self.shared
                    .console
                    .push(LogCategory::Error, format!("Transcription audio dropped: {err}"));
            }
        }
        result
    }

    /// Tear the session down without waiting for in-flight inference.
    ///
    /// Stops frame production, clears the text queue, cancels timers and background tasks, and
    /// closes the transcription link. Results that complete afterwards are discarded.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _enter = self.span.enter();

        self.shared.cancel.cancel();
        // Waits out a completion that passed its cancellation check before `cancel()`.
        let engine = self.shared.engine();
        let dropped = self.shared.queue.clear();
        self.framer.clear();
        self.segmenter.reset();
        self.shared.speaking.store(false, Ordering::Release);

        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        if let Some(decay) = self.shared.decay_slot().take() {
            decay.abort();
        }
        drop(engine);
        if let Some(link) = &self.link {
            link.close();
        }

        info!(dropped_segments = dropped, "session stopped");
        self.shared.console.push(LogCategory::Info, "Stopping session...");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_command(target: &mut dyn RenderTarget, command: &AnimationCommand) {
    match command {
        AnimationCommand::PlayOnce { clip, time_scale } => target.play_once(clip, *time_scale),
        AnimationCommand::ResumeIdle => target.resume_idle(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_requires_a_runtime() -> anyhow::Result<()> {
        let profile = CharacterProfile::jim()?;
        let err = SessionBuilder::new(profile).start().err().expect("no runtime");
        assert!(err.to_string().contains("tokio runtime"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn missing_capture_is_reported_and_leaves_state_alone() -> anyhow::Result<()> {
        let mut session = Session::builder(CharacterProfile::jim()?).start()?;
        let err = session.start_capture(None).unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
        assert!(matches!(
            session.push_capture(&[0.0; 16]),
            Err(Error::MissingResource(_))
        ));
        assert_eq!(session.state(), FusedState::neutral());
        assert!(
            session
                .console()
                .entries()
                .iter()
                .any(|e| e.category == LogCategory::Error)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_sample_rate_is_rejected() -> anyhow::Result<()> {
        let mut session = Session::builder(CharacterProfile::louisa()?).start()?;
        let res = session.start_capture(Some(CaptureFormat {
            channels: 1,
            sample_rate: 48_000,
        }));
        assert!(res.is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn closed_transport_drops_audio() -> anyhow::Result<()> {
        let session = Session::builder(CharacterProfile::jim()?).start()?;
        let err = session.forward_transcription_audio(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::TransportNotReady(_)));
        assert_eq!(session.transcription_state(), LinkState::Closed);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn completion_after_shutdown_leaves_engine_untouched() -> anyhow::Result<()> {
        let mut session = Session::builder(CharacterProfile::jim()?).start()?;
        let shared = Arc::clone(&session.shared);
        session.shutdown();

        let late = Classified {
            prediction: Prediction::new(Emotion::Angry, 0.95),
            latency: std::time::Duration::from_millis(3),
        };
        shared.complete("emotion", LogCategory::Emotion, Ok(late));

        assert_eq!(session.state(), FusedState::neutral());
        assert!(!shared.engine().decay_armed());
        assert!(shared.decay_slot().is_none());
        assert!(
            !session
                .console()
                .entries()
                .iter()
                .any(|e| e.category == LogCategory::Emotion)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent_and_stops_input() -> anyhow::Result<()> {
        let mut session = Session::builder(CharacterProfile::jim()?).start()?;
        session.start_capture(Some(CaptureFormat::mono()))?;
        session.push_capture(&[0.0; 1000])?;
        assert_eq!(session.buffered_samples(), 1000);

        session.shutdown();
        session.shutdown();
        assert!(session.is_closed());
        assert_eq!(session.buffered_samples(), 0);
        assert_eq!(session.push_capture(&[0.0; 1000])?, 0);
        assert!(!session.push_transcript("hello"));
        assert_eq!(session.state().emotion, Emotion::Neutral);
        Ok(())
    }
}
