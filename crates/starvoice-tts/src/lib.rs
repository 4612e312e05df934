//! Streaming text-to-speech playback.
//!
//! Text goes in, continuous audio comes out:
//!
//! ```text
//! text ──► text::Chunker ──► synth::SpeechSynthesizer ──► decode ──► schedule::PlaybackScheduler ──► device
//!                                                                                ▲
//!                                   engine::SpeechEngine (one session at a time) ┘
//! ```
//!
//! Long text is split into sentence-aligned segments, each segment is
//! synthesized and decoded in order, and the resulting buffers are placed
//! back-to-back on the output device's clock so playback starts after the
//! first segment instead of after the last. [`SpeechEngine`] owns the only
//! session: starting a new reading, or calling [`SpeechEngine::stop`],
//! tears the previous one down completely.
//!
//! Output goes through the [`OutputDevice`] trait. [`RenderDevice`] renders
//! to a WAV file; with the `local-audio` feature,
//! `device::local::LocalOutputDevice` plays on the default sound card.
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tokio_test as _;

pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod synth;
pub mod text;

// Re-export key types for convenience
pub use config::{EngineConfig, HttpSynthesizerConfig};
pub use decode::{DecodeError, DecodedAudioBuffer};
pub use device::render::RenderDevice;
pub use device::{AudioFormat, DeviceContext, OutputDevice, SourceHandle};
pub use engine::{EngineState, PlayOutcome, SpeechEngine};
pub use error::{AUDIO_ERROR_MESSAGE, TtsError};
pub use schedule::{PlaybackScheduler, Slot, Timeline};
pub use synth::http::HttpSynthesizer;
pub use synth::{RetryingSynthesizer, SpeechSynthesizer};
pub use text::{Chunker, Segment, chunk, normalize};
