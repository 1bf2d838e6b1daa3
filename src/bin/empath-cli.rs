use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use empath::engine::Frame;
use empath::expression::ExpressionVector;
use empath::logging;
use empath::models::onnx::{HfTokenizer, OnnxEmotionModel, OnnxSentimentModel};
use empath::wav::read_capture_file;
use empath::{CaptureFormat, CharacterProfile, Opts, RenderTarget, Session};

/// Samples per channel in one replayed capture chunk (20 ms at 16 kHz).
const CHUNK_FRAMES: usize = 320;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init();
    let params = get_params()?;

    let profile = load_profile(&params.profile)?;
    let audio = read_capture_file(&params.audio_path)
        .with_context(|| format!("failed to read capture audio '{}'", params.audio_path.display()))?;
    let utterances = match &params.transcript_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read transcript '{}'", path.display()))?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect(),
        None => Vec::new(),
    };

    let opts = Opts {
        confidence_threshold: params.confidence_threshold,
        audio_max_retries: params.max_audio_retries,
        require_speech_for_audio: params.require_speech,
        ..Opts::default()
    };

    let mut builder = Session::builder(profile).opts(opts).emotion_model(
        OnnxEmotionModel::from_file(&params.emotion_model_path)
            .context("failed to load emotion model")?,
    );
    if let (Some(model), Some(tokenizer)) = (&params.sentiment_model_path, &params.tokenizer_path) {
        builder = builder.sentiment_model(
            HfTokenizer::from_file(tokenizer).context("failed to load tokenizer")?,
            OnnxSentimentModel::from_file(model).context("failed to load sentiment model")?,
        );
    }

    let mut session = builder.start()?;
    let format = CaptureFormat {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
    };
    session.start_capture(Some(format))?;

    let stdout = io::stdout();
    let mut target = JsonLinesTarget::new(BufWriter::new(stdout.lock()), params.clip_seconds);

    let chunk_len = CHUNK_FRAMES * usize::from(audio.channels);
    let mut chunks = audio.samples.chunks(chunk_len);
    let audio_secs = audio.frames() as f64 / f64::from(audio.sample_rate);
    let script = Script::new(utterances, audio_secs);

    let mut capture_tick = tokio::time::interval(Duration::from_millis(20));
    capture_tick.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut render_tick = tokio::time::interval(Duration::from_secs_f64(1.0 / params.fps.max(1.0)));
    render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let mut capture_done = false;
    let mut capture_done_at = start;
    let tail = Duration::from_secs_f64(params.tail_seconds.max(0.0));

    loop {
        tokio::select! {
            _ = capture_tick.tick(), if !capture_done => {
                match chunks.next() {
                    Some(chunk) => {
                        session.push_capture(chunk)?;
                    }
                    None => {
                        capture_done = true;
                        capture_done_at = Instant::now();
                    }
                }
            }
            _ = render_tick.tick() => {
                let now = Instant::now();
                let elapsed = now.duration_since(start).as_secs_f64();
                script.drive(&mut session, elapsed);

                for clip in target.due_clips(now) {
                    session.clip_finished(&clip, &mut target);
                }
                let frame = session.render_tick(&mut target);
                target.write_frame(elapsed, &frame)?;

                if capture_done && now.duration_since(capture_done_at) >= tail {
                    break;
                }
            }
        }
    }

    session.shutdown();
    target.flush()?;
    Ok(())
}

/// Spreads transcript lines evenly over the replay, each bounded by speech start/stop.
struct Script {
    utterances: Vec<String>,
    slot_secs: f64,
}

impl Script {
    fn new(utterances: Vec<String>, total_secs: f64) -> Self {
        let slot_secs = if utterances.is_empty() {
            0.0
        } else {
            total_secs / utterances.len() as f64
        };
        Self {
            utterances,
            slot_secs,
        }
    }

    fn drive(&self, session: &mut Session, elapsed: f64) {
        if self.utterances.is_empty() || self.slot_secs <= 0.0 {
            return;
        }
        let slot = (elapsed / self.slot_secs) as usize;
        let Some(line) = self.utterances.get(slot) else {
            if session.is_speaking() {
                session.speech_stopped();
            }
            return;
        };

        let within = elapsed - slot as f64 * self.slot_secs;
        let speaking_window = self.slot_secs * 0.8;
        if within < speaking_window {
            if !session.is_speaking() {
                session.speech_started();
                session.push_transcript(line);
            }
        } else if session.is_speaking() {
            session.speech_stopped();
        }
    }
}

#[derive(Serialize)]
struct TickLine<'a> {
    t_ms: u64,
    #[serde(flatten)]
    frame: &'a Frame,
}

/// Writes one JSON line per tick and simulates clip completion.
struct JsonLinesTarget<W: Write> {
    out: W,
    clip_seconds: f64,
    playing: Vec<(Instant, String)>,
}

impl<W: Write> JsonLinesTarget<W> {
    fn new(out: W, clip_seconds: f64) -> Self {
        Self {
            out,
            clip_seconds,
            playing: Vec::new(),
        }
    }

    fn due_clips(&mut self, now: Instant) -> Vec<String> {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.playing.drain(..).partition(|(deadline, _)| *deadline <= now);
        self.playing = pending;
        due.into_iter().map(|(_, clip)| clip).collect()
    }

    fn write_frame(&mut self, elapsed_secs: f64, frame: &Frame) -> Result<()> {
        let line = TickLine {
            t_ms: (elapsed_secs * 1000.0) as u64,
            frame,
        };
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> RenderTarget for JsonLinesTarget<W> {
    fn apply_expression(&mut self, _expression: &ExpressionVector) {}

    fn play_once(&mut self, clip: &str, time_scale: f32) {
        let secs = self.clip_seconds / f64::from(time_scale.max(0.01));
        let deadline = Instant::now() + Duration::from_secs_f64(secs.max(0.0));
        self.playing.retain(|(_, c)| c != clip);
        self.playing.push((deadline, clip.to_owned()));
    }

    fn resume_idle(&mut self) {}
}

fn load_profile(spec: &str) -> Result<CharacterProfile> {
    match spec.to_ascii_lowercase().as_str() {
        "jim" | "louisa" => Ok(CharacterProfile::builtin(spec)?),
        _ => CharacterProfile::from_path(spec)
            .with_context(|| format!("failed to load profile '{spec}'")),
    }
}

#[derive(Parser, Debug)]
#[command(name = "empath")]
#[command(about = "Replay a capture through the emotion pipeline and print render ticks")]
struct Params {
    /// Built-in profile name (`jim`, `louisa`) or path to a profile JSON file.
    #[arg(short = 'p', long = "profile", default_value = "jim")]
    pub profile: String,

    /// 16 kHz mono or stereo WAV file replayed as the capture stream.
    #[arg(short = 'a', long = "audio")]
    pub audio_path: PathBuf,

    /// Transcript file, one utterance per line.
    #[arg(short = 't', long = "transcript")]
    pub transcript_path: Option<PathBuf>,

    #[arg(short = 'e', long = "emotion-model")]
    pub emotion_model_path: PathBuf,

    #[arg(short = 's', long = "sentiment-model", requires = "tokenizer_path")]
    pub sentiment_model_path: Option<PathBuf>,

    #[arg(long = "tokenizer", requires = "sentiment_model_path")]
    pub tokenizer_path: Option<PathBuf>,

    #[arg(long = "fps", default_value_t = 30.0)]
    pub fps: f64,

    /// Simulated length of a gesture clip at time scale 1.
    #[arg(long = "clip-seconds", default_value_t = 2.0)]
    pub clip_seconds: f64,

    /// Keep rendering this long after the capture ends.
    #[arg(long = "tail-seconds", default_value_t = 3.0)]
    pub tail_seconds: f64,

    #[arg(long = "confidence-threshold", default_value_t = empath::state::CONFIDENCE_THRESHOLD)]
    pub confidence_threshold: f32,

    /// Drop an audio frame after this many busy retries (unbounded by default).
    #[arg(long = "max-audio-retries")]
    pub max_audio_retries: Option<u32>,

    /// Only classify audio frames captured while the user is speaking.
    #[arg(long = "require-speech", default_value_t = false)]
    pub require_speech: bool,
}

fn get_params() -> Result<Params> {
    Ok(Params::parse())
}
