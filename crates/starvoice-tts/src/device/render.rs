//! Offline render device. Runs the whole pipeline without audio hardware.
//!
//! Rendering is instantaneous, so the device clock stays at zero and every
//! source reports completion as soon as it is attached. The attached clips
//! are mixed at their scheduled start times and, on close, written out as a
//! 16-bit WAV file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{AudioFormat, DeviceContext, EndedCallback, OutputDevice, SourceHandle};
use crate::decode::DecodedAudioBuffer;
use crate::error::TtsError;

/// [`OutputDevice`] that renders each session to a WAV file.
#[derive(Debug, Clone)]
pub struct RenderDevice {
    output: Option<PathBuf>,
}

impl RenderDevice {
    /// Render every session to `path`, overwriting it on each close.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            output: Some(path.into()),
        }
    }

    /// Accept and mix audio but never write it anywhere.
    #[must_use]
    pub const fn discard() -> Self {
        Self { output: None }
    }

    #[must_use]
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }
}

impl OutputDevice for RenderDevice {
    fn open(&self, format: AudioFormat) -> Result<Arc<dyn DeviceContext>, TtsError> {
        Ok(Arc::new(RenderContext::new(format, self.output.clone())))
    }
}

struct Clip {
    id: u64,
    start_frame: usize,
    samples: Vec<f32>,
}

#[derive(Default)]
struct RenderState {
    clips: Vec<Clip>,
    next_id: u64,
    closed: bool,
}

/// One rendering timeline.
pub struct RenderContext {
    format: AudioFormat,
    output: Option<PathBuf>,
    state: Arc<Mutex<RenderState>>,
}

impl RenderContext {
    #[must_use]
    pub fn new(format: AudioFormat, output: Option<PathBuf>) -> Self {
        Self {
            format,
            output,
            state: Arc::new(Mutex::new(RenderState::default())),
        }
    }

    /// Mix of everything attached so far, interleaved.
    #[must_use]
    pub fn mix(&self) -> Vec<f32> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        mix_clips(&state.clips, self.format.channels)
    }

    fn write_wav(&self, path: &Path, mix: &[f32]) -> Result<(), TtsError> {
        let spec = hound::WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;
        for &sample in mix {
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(value).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
        tracing::info!(path = %path.display(), samples = mix.len(), "Rendered speech to WAV");
        Ok(())
    }
}

impl DeviceContext for RenderContext {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn current_time(&self) -> f64 {
        0.0
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    fn start_source(
        &self,
        buffer: DecodedAudioBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn SourceHandle>, TtsError> {
        let id = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return Err(TtsError::DeviceClosed);
            }
            let id = state.next_id;
            state.next_id += 1;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let start_frame = (when.max(0.0) * f64::from(self.format.sample_rate)).round() as usize;
            state.clips.push(Clip {
                id,
                start_frame,
                samples: buffer.into_samples(),
            });
            id
        };

        // Lock released: the callback reaches back into the scheduler.
        on_ended();

        Ok(Box::new(RenderSource {
            id,
            state: Arc::downgrade(&self.state),
        }))
    }

    fn close(&self) -> Result<(), TtsError> {
        let clips = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            std::mem::take(&mut state.clips)
        };

        match &self.output {
            Some(path) => self.write_wav(path, &mix_clips(&clips, self.format.channels)),
            None => Ok(()),
        }
    }
}

struct RenderSource {
    id: u64,
    state: Weak<Mutex<RenderState>>,
}

impl SourceHandle for RenderSource {
    fn stop(&mut self) -> Result<(), TtsError> {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.closed {
                state.clips.retain(|clip| clip.id != self.id);
            }
        }
        Ok(())
    }
}

fn mix_clips(clips: &[Clip], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    let len = clips
        .iter()
        .map(|clip| clip.start_frame * channels + clip.samples.len())
        .max()
        .unwrap_or(0);

    let mut mix = vec![0.0_f32; len];
    for clip in clips {
        let offset = clip.start_frame * channels;
        for (out, sample) in mix[offset..].iter_mut().zip(&clip.samples) {
            *out += sample;
        }
    }
    mix
}

fn wav_error(e: hound::Error) -> TtsError {
    match e {
        hound::Error::IoError(io) => TtsError::Io(io),
        other => TtsError::Io(std::io::Error::other(other.to_string())),
    }
}
