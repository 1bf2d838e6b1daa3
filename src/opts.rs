use std::time::Duration;

use crate::expression::{SMOOTHING_RATE, SPEAKING_FLOOR};
use crate::state::CONFIDENCE_THRESHOLD;

/// Options that tune a reactive session.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI maps user input into this type so that the library stays usable from
/// tests, embedding applications and batch replays alike.
#[derive(Debug, Clone, PartialEq)]
pub struct Opts {
    /// A prediction must be strictly more confident than this to change the state.
    pub confidence_threshold: f32,

    /// Delay between delivery attempts of an audio frame while the inference gate is held.
    pub audio_retry_interval: Duration,

    /// Upper bound on busy retries for one audio frame.
    ///
    /// `None` retries until the gate frees up. With `Some(n)` the frame is dropped (and
    /// logged) after `n` failed retries.
    pub audio_max_retries: Option<u32>,

    /// Ignore audio frames emitted while the user is not speaking.
    pub require_speech_for_audio: bool,

    /// Per-tick smoothing factor for expression channels.
    pub smoothing_rate: f32,

    /// Minimum weight of the profile's speaking channel while the user talks.
    pub speaking_floor: f32,

    /// Number of console entries retained.
    pub console_capacity: usize,

    /// Interval between keepalive messages on an open transcription link.
    pub keepalive_interval: Duration,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
            audio_retry_interval: Duration::from_millis(100),
            audio_max_retries: None,
            require_speech_for_audio: false,
            smoothing_rate: SMOOTHING_RATE,
            speaking_floor: SPEAKING_FLOOR,
            console_capacity: crate::console::DEFAULT_CAPACITY,
            keepalive_interval: crate::transport::KEEPALIVE_INTERVAL,
        }
    }
}
