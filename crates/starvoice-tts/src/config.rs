//! Engine and synthesizer configuration.
//!
//! Both structs deserialize with `#[serde(default)]` so a partial JSON file
//! only overrides the fields it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TtsError;

/// Maximum characters per synthesis segment.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 800;

/// Sample rate of the synthesized audio (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Default OpenAI-compatible speech endpoint.
pub const DEFAULT_TTS_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";

/// Configuration for [`SpeechEngine`](crate::SpeechEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on segment length, in characters.
    pub max_chunk_chars: usize,

    /// Sample rate the device context is opened with and audio decoded at.
    pub sample_rate: u32,

    /// Channel count of the synthesized audio.
    pub channels: u16,

    /// Offset added to the device clock before the first start time, so
    /// setup latency never schedules into the past.
    pub lead_in_ms: u64,

    /// How long the attached-source set must stay empty before the session
    /// counts as finished.
    pub drain_grace_ms: u64,

    /// Extra synthesis attempts per segment before it is skipped.
    pub segment_retries: u32,

    /// Delay before retry `n` is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            lead_in_ms: 100,
            drain_grace_ms: 150,
            segment_retries: 0,
            retry_backoff_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), TtsError> {
        if self.max_chunk_chars == 0 {
            return Err(TtsError::Config("max_chunk_chars must be greater than zero".into()));
        }
        if self.sample_rate == 0 {
            return Err(TtsError::Config("sample_rate must be greater than zero".into()));
        }
        if self.channels == 0 {
            return Err(TtsError::Config("channels must be greater than zero".into()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn lead_in(&self) -> Duration {
        Duration::from_millis(self.lead_in_ms)
    }

    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Configuration for [`HttpSynthesizer`](crate::synth::http::HttpSynthesizer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSynthesizerConfig {
    /// Full URL of the speech endpoint.
    pub endpoint: String,

    /// Bearer token, if the backend requires one.
    pub api_key: Option<String>,

    /// Backend model name.
    pub model: String,

    /// Voice identifier.
    pub voice: String,

    /// Requested encoding. `pcm` is raw 16-bit little-endian mono at 24 kHz.
    pub response_format: String,

    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for HttpSynthesizerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_TTS_ENDPOINT.to_string(),
            api_key: None,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            response_format: "pcm".to_string(),
            timeout_secs: 30,
        }
    }
}

impl HttpSynthesizerConfig {
    /// Build a config from `STARVOICE_TTS_*` environment variables, falling
    /// back to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: lookup("STARVOICE_TTS_ENDPOINT").unwrap_or(defaults.endpoint),
            api_key: lookup("STARVOICE_TTS_API_KEY").filter(|k| !k.is_empty()),
            model: lookup("STARVOICE_TTS_MODEL").unwrap_or(defaults.model),
            voice: lookup("STARVOICE_TTS_VOICE").unwrap_or(defaults.voice),
            response_format: defaults.response_format,
            timeout_secs: lookup("STARVOICE_TTS_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_synthesis_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_chunk_chars, 800);
        assert_eq!(config.sample_rate, 24_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.lead_in(), Duration::from_millis(100));
        assert_eq!(config.segment_retries, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_chunk_length() {
        let config = EngineConfig {
            max_chunk_chars: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(TtsError::Config(_))));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "max_chunk_chars": 400, "segment_retries": 2 }"#).unwrap();
        assert_eq!(config.max_chunk_chars, 400);
        assert_eq!(config.segment_retries, 2);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn http_config_reads_lookup() {
        let config = HttpSynthesizerConfig::from_lookup(|key| match key {
            "STARVOICE_TTS_ENDPOINT" => Some("http://127.0.0.1:8880/v1/audio/speech".into()),
            "STARVOICE_TTS_API_KEY" => Some(String::new()),
            "STARVOICE_TTS_VOICE" => Some("nova".into()),
            "STARVOICE_TTS_TIMEOUT_SECS" => Some("5".into()),
            _ => None,
        });
        assert_eq!(config.endpoint, "http://127.0.0.1:8880/v1/audio/speech");
        assert_eq!(config.api_key, None);
        assert_eq!(config.voice, "nova");
        assert_eq!(config.model, "tts-1");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }
}
