//! The reactive state machine: fused state in, expression targets and gestures out.
//!
//! [`ReactiveEngine`] is synchronous and owns no timers. When an update should (re)arm the
//! decay timer it returns a [`DecayArm`]; whoever hosts the engine sleeps for the delay and
//! calls [`ReactiveEngine::expire`] with the arm's epoch. Rearming bumps the epoch, so a
//! pre-empted timer that still fires is a no-op.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::expression::{ExpressionVector, with_speaking_floor};
use crate::gesture::{AnimationCommand, EdgeTrigger, GestureMachine, GestureState};
use crate::labels::Emotion;
use crate::opts::Opts;
use crate::profile::{CharacterProfile, Reaction};
use crate::state::{FuseOutcome, FusedState, StateUpdate};

/// Request to schedule a reset to `(Neutral, Neutral)` after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayArm {
    pub epoch: u64,
    pub delay: Duration,
}

/// Bookkeeping for the single outstanding decay timer.
#[derive(Debug, Clone, Default)]
pub struct DecayTimer {
    epoch: u64,
    armed: bool,
}

impl DecayTimer {
    /// Invalidate any outstanding timer and arm a new one.
    pub fn arm(&mut self, delay: Duration) -> DecayArm {
        self.epoch += 1;
        self.armed = true;
        DecayArm {
            epoch: self.epoch,
            delay,
        }
    }

    /// Invalidate any outstanding timer.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        self.armed = false;
    }

    /// Consume the timer if `epoch` is the current arm.
    pub fn fire(&mut self, epoch: u64) -> bool {
        if !self.armed || epoch != self.epoch {
            return false;
        }
        self.armed = false;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Everything a renderer needs for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub state: FusedState,
    pub expression: ExpressionVector,
    pub commands: Vec<AnimationCommand>,
    pub gesture: GestureState,
}

pub struct ReactiveEngine {
    profile: Arc<CharacterProfile>,
    confidence_threshold: f32,
    smoothing_rate: f32,
    speaking_floor: f32,

    state: FusedState,
    decay: DecayTimer,
    expression: ExpressionVector,
    last_emotion: EdgeTrigger<Emotion>,
    gestures: GestureMachine,
    queued: Vec<AnimationCommand>,
}

impl ReactiveEngine {
    pub fn new(profile: Arc<CharacterProfile>, opts: &Opts) -> Self {
        let expression = ExpressionVector::with_channels(profile.expression_channels());
        Self {
            profile,
            confidence_threshold: opts.confidence_threshold,
            smoothing_rate: opts.smoothing_rate,
            speaking_floor: opts.speaking_floor,
            state: FusedState::neutral(),
            decay: DecayTimer::default(),
            expression,
            last_emotion: EdgeTrigger::new(Emotion::Neutral),
            gestures: GestureMachine::new(),
            queued: Vec::new(),
        }
    }

    pub fn profile(&self) -> &CharacterProfile {
        &self.profile
    }

    pub fn state(&self) -> FusedState {
        self.state
    }

    pub fn expression(&self) -> &ExpressionVector {
        &self.expression
    }

    pub fn gesture_state(&self) -> GestureState {
        self.gestures.state()
    }

    pub fn decay_armed(&self) -> bool {
        self.decay.is_armed()
    }

    /// The reaction for the current state.
    pub fn reaction(&self) -> &Reaction {
        self.profile
            .reactions
            .get(self.state.emotion, self.state.sentiment)
    }

    /// Fuse a prediction into the state.
    ///
    /// Only a change of state looks the reaction up again and rearms the decay timer (or
    /// cancels it when the reaction has no decay). Rejected predictions and confident repeats
    /// of the current label leave the timer alone.
    pub fn apply(&mut self, update: &StateUpdate) -> Option<DecayArm> {
        if self.state.fuse(update, self.confidence_threshold) != FuseOutcome::Changed {
            return None;
        }
        debug!(
            emotion = %self.state.emotion,
            sentiment = %self.state.sentiment,
            "fused state changed"
        );

        match self.reaction().decay_ms {
            Some(ms) => Some(self.decay.arm(Duration::from_millis(ms))),
            None => {
                self.decay.cancel();
                None
            }
        }
    }

    /// Decay timer with `epoch` fired. Resets the state to `(Neutral, Neutral)` unless the
    /// timer was pre-empted; returns whether it did.
    pub fn expire(&mut self, epoch: u64) -> bool {
        if !self.decay.fire(epoch) {
            return false;
        }
        debug!(
            emotion = %self.state.emotion,
            sentiment = %self.state.sentiment,
            "state decayed to neutral"
        );
        self.state = FusedState::neutral();
        true
    }

    /// Advance one render tick.
    pub fn tick(&mut self, speaking: bool) -> Frame {
        let reaction = self.reaction();
        let targets = match (&self.profile.speaking_channel, speaking) {
            (Some(channel), true) => {
                with_speaking_floor(&reaction.expression, channel, self.speaking_floor)
            }
            _ => reaction.expression.clone(),
        };
        let gesture = reaction.gesture.clone();

        self.expression.smooth_toward(&targets, self.smoothing_rate);

        let mut commands = std::mem::take(&mut self.queued);
        if self.last_emotion.update(self.state.emotion) {
            if let Some(gesture) = gesture {
                debug!(gesture = %gesture.name, emotion = %self.state.emotion, "gesture triggered");
                commands.extend(self.gestures.play(&gesture));
            }
        }

        Frame {
            state: self.state,
            expression: self.expression.clone(),
            commands,
            gesture: self.gestures.state(),
        }
    }

    /// Forward a clip completion from the animation collaborator.
    pub fn clip_finished(&mut self, clip: &str) -> Option<AnimationCommand> {
        self.gestures.clip_finished(clip)
    }

    /// Queue the profile's greeting gesture for the next tick.
    pub fn greet(&mut self) {
        if let Some(greeting) = self.profile.greeting.clone() {
            let commands = self.gestures.play(&greeting);
            self.queued.extend(commands);
        }
    }

    /// Back to rest: neutral state, zeroed expression, idle, no timer.
    pub fn reset(&mut self) {
        self.state = FusedState::neutral();
        self.decay.cancel();
        self.expression = ExpressionVector::with_channels(self.profile.expression_channels());
        self.last_emotion.reset(Emotion::Neutral);
        self.gestures.reset();
        self.queued.clear();
    }
}
