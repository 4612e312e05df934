//! Audio decoder: synthesized bytes to a playable sample buffer.
//!
//! Two encodings are accepted: a RIFF/WAVE container (parsed with `hound`)
//! or, for anything else, headerless 16-bit little-endian PCM in the
//! context's layout, which is what `response_format = "pcm"` returns.
//!
//! Decoding always happens against the context that will play the buffer.
//! A closed context is reported as [`DecodeError::ContextClosed`] rather
//! than producing a buffer nobody can attach.

use std::io::Cursor;
use std::time::Duration;

use crate::device::{AudioFormat, DeviceContext};

/// Decoded PCM ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    samples: Vec<f32>,
    format: AudioFormat,
}

impl DecodedAudioBuffer {
    /// Wrap interleaved samples. Trailing samples that do not fill a whole
    /// frame are dropped.
    #[must_use]
    pub fn new(mut samples: Vec<f32>, format: AudioFormat) -> Self {
        let channels = usize::from(format.channels.max(1));
        samples.truncate(samples.len() - samples.len() % channels);
        Self { samples, format }
    }

    /// Interleaved samples in `[-1.0, 1.0]`.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.format.channels.max(1))
    }

    /// Playback length in seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.format.sample_rate)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Why a block of bytes could not become a buffer.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("device context is closed")]
    ContextClosed,

    #[error("no audio samples")]
    Empty,

    #[error("PCM length {len} is not a multiple of the {frame}-byte frame size")]
    Misaligned { len: usize, frame: usize },

    #[error("unsupported WAV layout: {0}")]
    Unsupported(String),

    #[error("sample rate {found} Hz does not match the {expected} Hz context")]
    SampleRateMismatch { found: u32, expected: u32 },

    #[error("invalid WAV data: {0}")]
    Wav(#[from] hound::Error),
}

/// Decode `bytes` into a buffer in the context's format.
///
/// `format` is what the synthesis backend was asked to produce; for raw PCM
/// it is the only layout information there is.
pub fn decode(
    ctx: &dyn DeviceContext,
    bytes: &[u8],
    format: AudioFormat,
) -> Result<DecodedAudioBuffer, DecodeError> {
    if ctx.is_closed() {
        return Err(DecodeError::ContextClosed);
    }
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let target = ctx.format();
    let (samples, source) = if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)?
    } else {
        (decode_pcm16(bytes, format.channels)?, format)
    };

    if source.sample_rate != target.sample_rate {
        return Err(DecodeError::SampleRateMismatch {
            found: source.sample_rate,
            expected: target.sample_rate,
        });
    }

    let samples = remix(samples, source.channels, target.channels)?;
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedAudioBuffer::new(samples, target))
}

fn decode_pcm16(bytes: &[u8], channels: u16) -> Result<Vec<f32>, DecodeError> {
    let frame = 2 * usize::from(channels.max(1));
    if bytes.len() % frame != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            frame,
        });
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32_768.0)
        .collect())
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, AudioFormat), DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let format = AudioFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    };

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (hound::SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
        (sample_format, bits) => {
            return Err(DecodeError::Unsupported(format!("{sample_format:?} {bits}-bit")));
        }
    };

    Ok((samples, format))
}

/// Convert interleaved samples between channel counts. Only mono↔N is
/// supported: N→1 averages each frame, 1→N duplicates it.
#[allow(clippy::cast_precision_loss)]
fn remix(samples: Vec<f32>, from: u16, to: u16) -> Result<Vec<f32>, DecodeError> {
    match (from, to) {
        (a, b) if a == b => Ok(samples),
        (n, 1) if n > 1 => Ok(samples
            .chunks_exact(usize::from(n))
            .map(|frame| frame.iter().sum::<f32>() / f32::from(n))
            .collect()),
        (1, n) => Ok(samples
            .iter()
            .flat_map(|&s| std::iter::repeat_n(s, usize::from(n)))
            .collect()),
        (a, b) => Err(DecodeError::Unsupported(format!(
            "cannot remix {a} channels to {b}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::render::RenderDevice;
    use crate::device::OutputDevice;

    fn open_context() -> std::sync::Arc<dyn DeviceContext> {
        RenderDevice::discard().open(AudioFormat::SPEECH).unwrap()
    }

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn wav(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn raw_pcm_decodes_to_expected_duration() {
        let ctx = open_context();
        let bytes = pcm(&vec![0; 24_000]);
        let buffer = decode(ctx.as_ref(), &bytes, AudioFormat::SPEECH).unwrap();
        assert_eq!(buffer.frames(), 24_000);
        assert!((buffer.duration_secs() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_pcm_scales_to_unit_range() {
        let ctx = open_context();
        let buffer = decode(ctx.as_ref(), &pcm(&[i16::MIN, 0, 16_384]), AudioFormat::SPEECH).unwrap();
        assert_eq!(buffer.samples(), &[-1.0, 0.0, 0.5]);
    }

    #[test]
    fn odd_length_pcm_is_rejected() {
        let ctx = open_context();
        let err = decode(ctx.as_ref(), &[1, 2, 3], AudioFormat::SPEECH).unwrap_err();
        assert!(matches!(err, DecodeError::Misaligned { len: 3, frame: 2 }));
    }

    #[test]
    fn empty_bytes_are_rejected() {
        let ctx = open_context();
        assert!(matches!(
            decode(ctx.as_ref(), &[], AudioFormat::SPEECH),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn closed_context_is_a_defined_failure() {
        let ctx = open_context();
        ctx.close().unwrap();
        let err = decode(ctx.as_ref(), &pcm(&[0, 0]), AudioFormat::SPEECH).unwrap_err();
        assert!(matches!(err, DecodeError::ContextClosed));
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let ctx = open_context();
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav(spec, &[16_384, 0, -16_384, -16_384]);
        let buffer = decode(ctx.as_ref(), &bytes, AudioFormat::SPEECH).unwrap();
        assert_eq!(buffer.samples(), &[0.25, -0.5]);
    }

    #[test]
    fn wav_with_wrong_rate_is_rejected() {
        let ctx = open_context();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let err = decode(ctx.as_ref(), &wav(spec, &[0; 10]), AudioFormat::SPEECH).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SampleRateMismatch {
                found: 44_100,
                expected: 24_000
            }
        ));
    }
}
