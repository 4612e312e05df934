//! Playback engine error types.

/// Generic message shown to listeners when synthesis fails as a whole.
///
/// Per-segment failures never reach the UI individually; they collapse into
/// this text once nothing at all could be played.
pub const AUDIO_ERROR_MESSAGE: &str = "Audio playback failed. Please try again.";

/// Errors that can occur in the text-to-speech playback engine.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// The synthesis backend failed for one segment.
    #[error("Speech synthesis failed for segment {segment}: {message}")]
    SegmentFetch { segment: usize, message: String },

    /// The synthesis backend answered with no audio for one segment.
    #[error("Speech synthesis returned no audio for segment {segment}")]
    EmptyAudio { segment: usize },

    /// Synthesized bytes for one segment could not be decoded.
    #[error("Failed to decode audio for segment {segment}: {message}")]
    SegmentDecode { segment: usize, message: String },

    /// Every segment of a session failed, nothing was scheduled.
    #[error("Speech synthesis failed for all {segments} segments")]
    TotalSynthesisFailure { segments: usize },

    /// The output device could not be opened or refused playback.
    #[error("Audio output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device context was closed before the operation ran.
    #[error("Audio device context is closed")]
    DeviceClosed,

    /// The owning session was stopped or superseded.
    #[error("Playback cancelled")]
    Cancelled,

    /// Unexpected failure inside the session pipeline itself.
    #[error("Playback pipeline failed: {0}")]
    Pipeline(String),

    /// Invalid engine or synthesizer configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// HTTP transport error talking to the synthesis backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (rendered output files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TtsError {
    /// Whether the pipeline recovers from this error by skipping the segment.
    #[must_use]
    pub const fn is_segment_local(&self) -> bool {
        matches!(
            self,
            Self::SegmentFetch { .. }
                | Self::EmptyAudio { .. }
                | Self::SegmentDecode { .. }
                | Self::Http(_)
        )
    }

    /// Whether this error only reflects the engine's own cancellation.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Message published in [`EngineState::Error`](crate::EngineState::Error).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceUnavailable(_) => self.to_string(),
            _ => AUDIO_ERROR_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_failures_are_local() {
        assert!(TtsError::SegmentFetch { segment: 2, message: "503".into() }.is_segment_local());
        assert!(TtsError::EmptyAudio { segment: 1 }.is_segment_local());
        assert!(TtsError::SegmentDecode { segment: 3, message: "odd length".into() }.is_segment_local());
        assert!(!TtsError::TotalSynthesisFailure { segments: 3 }.is_segment_local());
        assert!(!TtsError::DeviceClosed.is_segment_local());
    }

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(TtsError::Cancelled.is_cancellation());
        assert!(!TtsError::DeviceClosed.is_cancellation());
    }

    #[test]
    fn user_message_is_generic_for_synthesis_failures() {
        let err = TtsError::TotalSynthesisFailure { segments: 4 };
        assert_eq!(err.user_message(), AUDIO_ERROR_MESSAGE);

        let err = TtsError::DeviceUnavailable("no default output device".into());
        assert!(err.user_message().contains("no default output device"));
    }
}
