//! Edge-triggered gesture dispatch and the Idle/PlayingGesture animation machine.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::trace;

use crate::profile::Gesture;

/// Reports `true` only when the observed value differs from the previous one.
#[derive(Debug, Clone)]
pub struct EdgeTrigger<T> {
    last: T,
}

impl<T: PartialEq + Clone> EdgeTrigger<T> {
    pub fn new(initial: T) -> Self {
        Self { last: initial }
    }

    /// Record `value`; true if it differs from the last recorded value.
    pub fn update(&mut self, value: T) -> bool {
        if self.last == value {
            return false;
        }
        self.last = value;
        true
    }

    pub fn last(&self) -> &T {
        &self.last
    }

    pub fn reset(&mut self, value: T) {
        self.last = value;
    }
}

/// Instruction for the animation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AnimationCommand {
    /// Play `clip` once at `time_scale`, reporting completion through `clip_finished`.
    PlayOnce { clip: String, time_scale: f32 },
    /// Return to the looping idle animation.
    ResumeIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GestureState {
    Idle,
    PlayingGesture,
}

#[derive(Debug, Clone)]
struct ActiveGesture {
    name: String,
    pending: BTreeSet<String>,
    finisher: String,
}

/// Tracks the one gesture (possibly split into sub-clips) currently playing.
#[derive(Debug, Clone, Default)]
pub struct GestureMachine {
    active: Option<ActiveGesture>,
}

impl GestureMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GestureState {
        match self.active {
            Some(_) => GestureState::PlayingGesture,
            None => GestureState::Idle,
        }
    }

    /// Name of the gesture being played, if any.
    pub fn playing(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    /// Start `gesture`, pre-empting whatever was playing. Returns one `PlayOnce` per sub-clip.
    pub fn play(&mut self, gesture: &Gesture) -> Vec<AnimationCommand> {
        let clips = gesture.clips();
        if let Some(prev) = self.active.take() {
            trace!(previous = %prev.name, next = %gesture.name, "gesture pre-empted");
        }

        self.active = Some(ActiveGesture {
            name: gesture.name.clone(),
            pending: clips.iter().cloned().collect(),
            finisher: gesture.finisher_clip(),
        });

        clips
            .into_iter()
            .map(|clip| AnimationCommand::PlayOnce {
                clip,
                time_scale: gesture.time_scale,
            })
            .collect()
    }

    /// Completion event for `clip`. Returns `ResumeIdle` exactly once, when the finisher ends.
    pub fn clip_finished(&mut self, clip: &str) -> Option<AnimationCommand> {
        let active = self.active.as_mut()?;
        if !active.pending.remove(clip) {
            trace!(clip, "ignoring completion of a clip that is not playing");
            return None;
        }

        if clip == active.finisher {
            self.active = None;
            return Some(AnimationCommand::ResumeIdle);
        }
        None
    }

    /// Drop the current gesture without emitting commands.
    pub fn reset(&mut self) {
        self.active = None;
    }
}
