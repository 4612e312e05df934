//! Output audio device abstraction.
//!
//! A [`DeviceContext`] is one open timeline on the audio hardware: it has a
//! clock, accepts decoded buffers at absolute start times, and is closed
//! when the session that opened it ends. The engine opens a fresh context
//! per session through an [`OutputDevice`].
//!
//! | Implementor | Where used |
//! |---|---|
//! | [`render::RenderDevice`] | Offline: mixes the timeline into a WAV file |
//! | `local::LocalOutputDevice` (feature `local-audio`) | Live playback via rodio |
//!
//! All traits are object-safe and every method takes `&self`; contexts use
//! interior mutability so the scheduler can share one behind an `Arc`.

#[cfg(feature = "local-audio")]
pub mod local;
pub mod render;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::decode::DecodedAudioBuffer;
use crate::error::TtsError;

/// Sample layout a context is opened with and audio is decoded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second.
    pub sample_rate: u32,

    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioFormat {
    /// 24 kHz mono, the synthesis backend's native layout.
    pub const SPEECH: Self = Self {
        sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
        channels: 1,
    };
}

/// One-shot callback fired when an attached source finishes playing
/// naturally. Never fired for a source that was stopped.
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Factory for device contexts.
pub trait OutputDevice: Send + Sync {
    /// Open a fresh context at the given format.
    ///
    /// Fails with [`TtsError::DeviceUnavailable`] when the host has no
    /// usable output or refuses to open one.
    fn open(&self, format: AudioFormat) -> Result<Arc<dyn DeviceContext>, TtsError>;
}

/// An open output timeline.
pub trait DeviceContext: Send + Sync {
    /// Format this context was opened with.
    fn format(&self) -> AudioFormat;

    /// Current device-clock time in seconds.
    fn current_time(&self) -> f64;

    /// Whether [`close`](DeviceContext::close) has run.
    fn is_closed(&self) -> bool;

    /// Attach `buffer` so that it starts sounding at device time `when`.
    ///
    /// `on_ended` fires once the buffer has played to the end. It may fire
    /// from any thread, and devices with a virtual clock may fire it before
    /// this method returns.
    fn start_source(
        &self,
        buffer: DecodedAudioBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn SourceHandle>, TtsError>;

    /// Release the context. Idempotent; later `start_source` calls fail
    /// with [`TtsError::DeviceClosed`].
    fn close(&self) -> Result<(), TtsError>;
}

/// Live handle to one attached buffer.
pub trait SourceHandle: Send {
    /// Halt the source and detach it from the device. Stopping a source
    /// that already finished is not an error.
    fn stop(&mut self) -> Result<(), TtsError>;
}
