//! Accumulates streamed transcript fragments into utterance-sized segments.
//!
//! The voice transport tells us when the user starts and stops speaking; the speech-to-text
//! service streams fragments independently. A segment never spans a silence gap: the buffer
//! is cleared on every rising edge of the speaking flag.

/// Streaming transcript segmenter.
#[derive(Debug, Default)]
pub struct Segmenter {
    speaking: bool,
    buffer: String,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Handle `speech_started`. Only the false → true transition clears the buffer.
    pub fn speech_started(&mut self) {
        if !self.speaking {
            self.buffer.clear();
        }
        self.speaking = true;
    }

    /// Handle `speech_stopped`. The buffer is kept until the next utterance begins.
    pub fn speech_stopped(&mut self) {
        self.speaking = false;
    }

    /// Append a fragment while speaking.
    ///
    /// Returns the trimmed candidate segment whenever the buffer changed and is non-empty
    /// after trimming. Fragments that arrive outside speech are ignored.
    pub fn push_fragment(&mut self, fragment: &str) -> Option<String> {
        if !self.speaking || fragment.is_empty() {
            return None;
        }

        self.buffer.push_str(fragment);
        self.buffer.push(' ');

        let trimmed = self.buffer.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.to_owned())
    }

    /// Current in-progress buffer (untrimmed).
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Drop the in-progress buffer and leave speech.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.speaking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_accumulate_with_single_spaces() {
        let mut seg = Segmenter::new();
        seg.speech_started();
        assert_eq!(seg.push_fragment("hello").as_deref(), Some("hello"));
        assert_eq!(seg.push_fragment("there").as_deref(), Some("hello there"));
        assert_eq!(seg.pending(), "hello there ");
    }

    #[test]
    fn fragments_outside_speech_are_ignored() {
        let mut seg = Segmenter::new();
        assert_eq!(seg.push_fragment("ignored"), None);
        assert_eq!(seg.pending(), "");
    }

    #[test]
    fn rising_edge_clears_previous_utterance() {
        let mut seg = Segmenter::new();
        seg.speech_started();
        let _ = seg.push_fragment("first");
        seg.speech_stopped();
        assert_eq!(seg.pending(), "first ");

        seg.speech_started();
        assert_eq!(seg.pending(), "");
        assert_eq!(seg.push_fragment("second").as_deref(), Some("second"));
    }

    #[test]
    fn repeated_start_without_stop_keeps_buffer() {
        let mut seg = Segmenter::new();
        seg.speech_started();
        let _ = seg.push_fragment("still");
        seg.speech_started();
        assert_eq!(seg.push_fragment("going").as_deref(), Some("still going"));
    }

    #[test]
    fn whitespace_only_segments_are_discarded() {
        let mut seg = Segmenter::new();
        seg.speech_started();
        assert_eq!(seg.push_fragment("   "), None);
        assert_eq!(seg.push_fragment(""), None);
    }
}
