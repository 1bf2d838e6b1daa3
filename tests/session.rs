use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use empath::console::LogCategory;
use empath::expression::ExpressionVector;
use empath::model::{TokenizedText, Tokenizer};
use empath::transport::{LinkState, TranscriptionTransport};
use empath::{
    CaptureFormat, CharacterProfile, Emotion, FusedState, RenderTarget, Sentiment, Session,
};

/// Tracks concurrent model invocations across both paths.
#[derive(Default)]
struct Probe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    audio_calls: AtomicUsize,
    text_calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl Probe {
    fn run<T>(&self, work: Duration, f: impl FnOnce() -> T) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(work);
        let out = f();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }

    fn audio_calls(&self) -> usize {
        self.audio_calls.load(Ordering::SeqCst)
    }

    fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Encodes text as its bytes so the fake model can recover it.
struct ByteTokenizer;

impl Tokenizer for ByteTokenizer {
    fn tokenize(&mut self, text: &str) -> empath::Result<TokenizedText> {
        let ids: Vec<i64> = text.bytes().map(i64::from).collect();
        let attention_mask = vec![1; ids.len()];
        Ok(TokenizedText {
            ids,
            attention_mask,
        })
    }
}

fn decode(tokens: &TokenizedText) -> String {
    tokens.ids.iter().map(|&b| b as u8 as char).collect()
}

/// Logits whose softmax puts `confidence` on `label` and splits the rest evenly.
fn logits_for(label: Sentiment, confidence: f32) -> Vec<f32> {
    let rest = (1.0 - confidence) / 2.0;
    Sentiment::ALL
        .iter()
        .map(|s| if *s == label { confidence.ln() } else { rest.ln() })
        .collect()
}

fn session_with(
    probe: &Arc<Probe>,
    emotion_logits: Vec<f32>,
    sentiments: HashMap<&'static str, (Sentiment, f32)>,
    work: Duration,
) -> Result<Session> {
    let audio_probe = Arc::clone(probe);
    let text_probe = Arc::clone(probe);

    let session = Session::builder(CharacterProfile::jim()?)
        .emotion_model(move |_: &[f32]| -> empath::Result<Vec<f32>> {
            audio_probe.audio_calls.fetch_add(1, Ordering::SeqCst);
            Ok(audio_probe.run(work, || emotion_logits.clone()))
        })
        .sentiment_model(ByteTokenizer, move |tokens: &TokenizedText| -> empath::Result<Vec<f32>> {
            let text = decode(tokens);
            text_probe.text_calls.fetch_add(1, Ordering::SeqCst);
            text_probe
                .texts
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(text.clone());
            let (label, confidence) = sentiments
                .get(text.as_str())
                .copied()
                .unwrap_or((Sentiment::Neutral, 0.34));
            Ok(text_probe.run(work, || logits_for(label, confidence)))
        })
        .start()?;
    Ok(session)
}

fn say(session: &mut Session, text: &str) {
    session.speech_started();
    session.push_transcript(text);
    session.speech_stopped();
}

/// Poll `cond` on the virtual clock, one millisecond at a time.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
struct RecordingTarget {
    expressions: usize,
    played: Vec<(String, f32)>,
    resumed: usize,
}

impl RenderTarget for RecordingTarget {
    fn apply_expression(&mut self, _expression: &ExpressionVector) {
        self.expressions += 1;
    }

    fn play_once(&mut self, clip: &str, time_scale: f32) {
        self.played.push((clip.to_owned(), time_scale));
    }

    fn resume_idle(&mut self) {
        self.resumed += 1;
    }
}

#[tokio::test(start_paused = true)]
async fn silence_yields_two_frames_and_no_emotion_change() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let mut session = session_with(&probe, vec![0.0; 7], HashMap::new(), Duration::from_millis(2))?;
    session.start_capture(Some(CaptureFormat::mono()))?;

    let mut frames = 0;
    for chunk in vec![0.0_f32; 64_000].chunks(1_600) {
        frames += session.push_capture(chunk)?;
    }
    assert_eq!(frames, 2);
    assert_eq!(session.buffered_samples(), 0);

    wait_until(|| probe.audio_calls() == 2 && !session.inference_in_flight()).await;
    assert_eq!(session.state().emotion, Emotion::Neutral);
    assert_eq!(probe.max_in_flight(), 1);

    let predictions: Vec<_> = session
        .console()
        .entries()
        .into_iter()
        .filter(|e| e.category == LogCategory::Emotion && e.message.starts_with("Predicted"))
        .collect();
    assert_eq!(predictions.len(), 2);
    assert!(predictions[0].message.contains("14.3% confidence"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn low_confidence_sentiment_does_not_overwrite() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let sentiments = HashMap::from([
        ("great job", (Sentiment::Positive, 0.9)),
        ("terrible", (Sentiment::Negative, 0.4)),
    ]);
    let mut session = session_with(&probe, vec![0.0; 7], sentiments, Duration::from_millis(1))?;

    say(&mut session, "great job");
    wait_until(|| probe.text_calls() == 1 && !session.inference_in_flight()).await;
    assert_eq!(session.state().sentiment, Sentiment::Positive);

    say(&mut session, "terrible");
    wait_until(|| probe.text_calls() == 2 && !session.inference_in_flight()).await;
    assert_eq!(session.state().sentiment, Sentiment::Positive);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn text_segments_are_classified_in_arrival_order() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let mut session = session_with(&probe, vec![0.0; 7], HashMap::new(), Duration::from_millis(1))?;

    for text in ["one", "two", "three", "four"] {
        say(&mut session, text);
    }
    assert!(session.pending_segments() >= 3);

    wait_until(|| probe.text_calls() == 4 && session.pending_segments() == 0).await;
    let texts = probe.texts.lock().map(|t| t.clone()).unwrap_or_default();
    assert_eq!(texts, vec!["one", "two", "three", "four"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn both_paths_share_one_inference_slot() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let mut session = session_with(&probe, vec![0.0; 7], HashMap::new(), Duration::from_millis(5))?;
    session.start_capture(Some(CaptureFormat::stereo()))?;

    // Three stereo frames, interleaved with four utterances.
    let stereo = vec![0.25_f32; 2 * 32_000];
    for (i, text) in ["a", "b", "c", "d"].into_iter().enumerate() {
        if i < 3 {
            session.push_capture(&stereo)?;
        }
        say(&mut session, text);
    }

    wait_until(|| probe.audio_calls() == 3 && probe.text_calls() == 4 && !session.inference_in_flight())
        .await;
    assert_eq!(probe.max_in_flight(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn confident_state_decays_and_later_changes_pre_empt() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let sentiments = HashMap::from([
        ("great job", (Sentiment::Positive, 0.9)),
        ("awful", (Sentiment::Negative, 0.9)),
    ]);
    let mut session = session_with(&probe, vec![0.0; 7], sentiments, Duration::from_millis(1))?;

    say(&mut session, "great job");
    wait_until(|| session.state().sentiment == Sentiment::Positive).await;

    // Neutral/Positive decays after 1500 ms; replace it with Neutral/Negative (2500 ms) first.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    say(&mut session, "awful");
    wait_until(|| session.state().sentiment == Sentiment::Negative).await;

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(session.state().sentiment, Sentiment::Negative);

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(session.state(), FusedState::neutral());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn repeating_the_current_sentiment_does_not_delay_decay() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let sentiments = HashMap::from([("great job", (Sentiment::Positive, 0.9))]);
    let mut session = session_with(&probe, vec![0.0; 7], sentiments, Duration::from_millis(1))?;

    say(&mut session, "great job");
    wait_until(|| session.state().sentiment == Sentiment::Positive).await;

    // Neutral/Positive decays 1500 ms after the first acceptance, repeat or not.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    say(&mut session, "great job");
    wait_until(|| probe.text_calls() == 2 && !session.inference_in_flight()).await;
    assert_eq!(session.state().sentiment, Sentiment::Positive);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(session.state(), FusedState::neutral());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_classification_is_dropped_and_the_queue_moves_on() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let text_probe = Arc::clone(&probe);
    let mut session = Session::builder(CharacterProfile::jim()?)
        .sentiment_model(ByteTokenizer, move |tokens: &TokenizedText| -> empath::Result<Vec<f32>> {
            let text = decode(tokens);
            text_probe.text_calls.fetch_add(1, Ordering::SeqCst);
            text_probe.run(Duration::from_millis(1), || match text.as_str() {
                "bad" => Err(empath::Error::Inference("model rejected input".into())),
                _ => Ok(logits_for(Sentiment::Negative, 0.9)),
            })
        })
        .start()?;

    say(&mut session, "bad");
    say(&mut session, "ok");

    wait_until(|| probe.text_calls() == 2 && !session.inference_in_flight()).await;
    wait_until(|| session.state().sentiment == Sentiment::Negative).await;
    assert_eq!(probe.max_in_flight(), 1);
    assert_eq!(session.state().emotion, Emotion::Neutral);

    let entries = session.console().entries();
    let errors = entries
        .iter()
        .filter(|e| e.category == LogCategory::Error)
        .count();
    assert_eq!(errors, 1);
    let predicted: Vec<_> = entries
        .iter()
        .filter(|e| e.category == LogCategory::Sentiment && e.message.starts_with("Predicted"))
        .collect();
    assert_eq!(predicted.len(), 1);
    assert!(predicted[0].message.contains("Negative"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_in_flight_results() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let sentiments = HashMap::from([("great job", (Sentiment::Positive, 0.9))]);
    let mut session = session_with(&probe, vec![0.0; 7], sentiments, Duration::from_millis(50))?;

    say(&mut session, "great job");
    say(&mut session, "queued behind");

    // Yield (rather than sleep) so the virtual clock stays put while the model runs.
    for _ in 0..100 {
        if session.inference_in_flight() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(session.inference_in_flight());

    session.shutdown();
    assert_eq!(session.pending_segments(), 0);

    // Let the model call finish on the blocking pool.
    std::thread::sleep(Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(session.state(), FusedState::neutral());
    assert_eq!(probe.text_calls(), 1);
    assert!(
        !session
            .console()
            .entries()
            .iter()
            .any(|e| e.category == LogCategory::Sentiment)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn greeting_plays_then_returns_to_idle() -> Result<()> {
    let probe = Arc::new(Probe::default());
    let mut session = session_with(&probe, vec![0.0; 7], HashMap::new(), Duration::from_millis(1))?;
    let mut target = RecordingTarget::default();

    session.render_tick(&mut target);
    let clips: Vec<_> = target.played.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(clips, vec!["Wave_Head", "Wave_Body"]);

    assert!(session.clip_finished("Wave_Head", &mut target).is_none());
    assert!(session.clip_finished("Wave_Body", &mut target).is_some());
    assert_eq!(target.resumed, 1);

    session.render_tick(&mut target);
    assert_eq!(target.expressions, 2);
    assert_eq!(target.played.len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn confident_emotion_change_fires_its_gesture_once() -> Result<()> {
    let probe = Arc::new(Probe::default());
    // Strongly "Happy".
    let happy = vec![10.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    let sentiments = HashMap::from([("great job", (Sentiment::Positive, 0.9))]);
    let mut session = session_with(&probe, happy, sentiments, Duration::from_millis(1))?;
    session.start_capture(Some(CaptureFormat::mono()))?;
    let mut target = RecordingTarget::default();
    session.render_tick(&mut target);
    target.played.clear();

    say(&mut session, "great job");
    wait_until(|| session.state().sentiment == Sentiment::Positive).await;
    session.push_capture(&vec![0.1_f32; 32_000])?;
    wait_until(|| session.state().emotion == Emotion::Happy).await;

    session.render_tick(&mut target);
    session.render_tick(&mut target);
    assert_eq!(target.played, vec![("Yes".to_owned(), 1.1)]);
    Ok(())
}

#[derive(Default)]
struct CountingTransport {
    bytes: AtomicUsize,
    keepalives: AtomicUsize,
}

impl TranscriptionTransport for CountingTransport {
    fn send_audio(&self, audio: &[u8]) -> empath::Result<()> {
        self.bytes.fetch_add(audio.len(), Ordering::SeqCst);
        Ok(())
    }

    fn keep_alive(&self) -> empath::Result<()> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn transcription_link_gates_audio_and_keeps_alive() -> Result<()> {
    let transport = Arc::new(CountingTransport::default());
    let mut session = Session::builder(CharacterProfile::louisa()?)
        .transcription(transport.clone())
        .start()?;

    assert!(session.forward_transcription_audio(&[0; 4]).is_err());
    assert_eq!(transport.bytes.load(Ordering::SeqCst), 0);

    session.transcription_opened();
    assert_eq!(session.transcription_state(), LinkState::Open);
    session.forward_transcription_audio(&[0; 4])?;
    assert_eq!(transport.bytes.load(Ordering::SeqCst), 4);

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(transport.keepalives.load(Ordering::SeqCst), 2);

    session.shutdown();
    assert_eq!(session.transcription_state(), LinkState::Closed);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.keepalives.load(Ordering::SeqCst), 2);
    Ok(())
}
