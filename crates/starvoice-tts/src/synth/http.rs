//! OpenAI-compatible speech backend over HTTP.
//!
//! Posts `{ model, input, voice, response_format }` to the configured
//! endpoint and returns the response body untouched. With the default
//! `pcm` format that body is raw 16-bit little-endian mono at 24 kHz.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::SpeechSynthesizer;
use crate::config::HttpSynthesizerConfig;
use crate::error::TtsError;
use crate::text::Segment;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Speech synthesizer backed by an HTTP endpoint.
pub struct HttpSynthesizer {
    config: HttpSynthesizerConfig,
    client: Client,
}

impl HttpSynthesizer {
    pub fn new(config: HttpSynthesizerConfig) -> Result<Self, TtsError> {
        if config.endpoint.trim().is_empty() {
            return Err(TtsError::Config("speech endpoint is empty".into()));
        }
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub const fn config(&self) -> &HttpSynthesizerConfig {
        &self.config
    }

    async fn request(&self, segment: &Segment) -> Result<Bytes, TtsError> {
        let body = SpeechRequest {
            model: &self.config.model,
            input: &segment.text,
            voice: &self.config.voice,
            response_format: &self.config.response_format,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| TtsError::SegmentFetch {
            segment: segment.index,
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TtsError::SegmentFetch {
                segment: segment.index,
                message: format!("backend returned {status}: {}", truncate(&detail, 200)),
            });
        }

        let audio = response.bytes().await.map_err(|e| TtsError::SegmentFetch {
            segment: segment.index,
            message: format!("response read error: {e}"),
        })?;

        if audio.is_empty() {
            return Err(TtsError::EmptyAudio {
                segment: segment.index,
            });
        }

        Ok(audio)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        segment: &Segment,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TtsError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TtsError::Cancelled),
            result = self.request(segment) => result,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(end, _)| &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_openai_field_names() {
        let body = SpeechRequest {
            model: "tts-1",
            input: "Hello.",
            voice: "alloy",
            response_format: "pcm",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "tts-1",
                "input": "Hello.",
                "voice": "alloy",
                "response_format": "pcm",
            })
        );
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let config = HttpSynthesizerConfig {
            endpoint: "  ".into(),
            ..HttpSynthesizerConfig::default()
        };
        assert!(matches!(HttpSynthesizer::new(config), Err(TtsError::Config(_))));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let synth = HttpSynthesizer::new(HttpSynthesizerConfig {
            endpoint: "http://127.0.0.1:9/v1/audio/speech".into(),
            ..HttpSynthesizerConfig::default()
        })
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let segment = Segment {
            index: 1,
            text: "Hello.".into(),
        };

        let err = synth.synthesize(&segment, &cancel).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
