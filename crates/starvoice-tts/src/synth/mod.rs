//! Speech fetch client, the boundary to the synthesis backend.
//!
//! The engine treats the backend as opaque: given one [`Segment`] it returns
//! encoded audio bytes or fails. A failure is an expected outcome; the
//! pipeline skips the segment and carries on.
//!
//! | Implementor | Where used |
//! |---|---|
//! | [`http::HttpSynthesizer`] | OpenAI-compatible `/v1/audio/speech` backends |
//! | [`RetryingSynthesizer`] | Wraps any synthesizer with bounded retries |

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::TtsError;
use crate::text::Segment;

/// Backend-agnostic text-to-speech client.
///
/// Implementations must be `Send + Sync` so one instance can be shared by
/// every session the engine runs.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Request synthesized audio for one segment.
    ///
    /// `cancel` fires when the owning session is stopped or superseded.
    /// Implementations may use it to abort early; the pipeline also drops
    /// the call and discards any late result on its own.
    async fn synthesize(&self, segment: &Segment, cancel: &CancellationToken)
    -> Result<Bytes, TtsError>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Retries failed segments a bounded number of times with linear backoff.
///
/// Only segment-local failures are retried. Cancellation during a backoff
/// sleep returns [`TtsError::Cancelled`] at once.
pub struct RetryingSynthesizer {
    inner: Arc<dyn SpeechSynthesizer>,
    retries: u32,
    backoff: Duration,
}

impl RetryingSynthesizer {
    pub fn new(inner: Arc<dyn SpeechSynthesizer>, retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            retries,
            backoff,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for RetryingSynthesizer {
    async fn synthesize(
        &self,
        segment: &Segment,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TtsError> {
        let mut attempt = 0;
        loop {
            let result = match self.inner.synthesize(segment, cancel).await {
                Ok(bytes) if bytes.is_empty() => Err(TtsError::EmptyAudio {
                    segment: segment.index,
                }),
                other => other,
            };

            match result {
                Err(e) if e.is_segment_local() && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(
                        segment = segment.index,
                        attempt,
                        error = %e,
                        "Retrying segment synthesis"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(TtsError::Cancelled),
                        () = tokio::time::sleep(self.backoff * attempt) => {}
                    }
                }
                other => return other,
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Fails the first `failures` calls, then returns one byte pair.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SpeechSynthesizer for Flaky {
        async fn synthesize(
            &self,
            segment: &Segment,
            _cancel: &CancellationToken,
        ) -> Result<Bytes, TtsError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(TtsError::SegmentFetch {
                    segment: segment.index,
                    message: "503 Service Unavailable".into(),
                })
            } else {
                Ok(Bytes::from_static(&[0, 0]))
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn segment() -> Segment {
        Segment {
            index: 1,
            text: "Hello.".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let inner = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let synth = RetryingSynthesizer::new(inner.clone(), 2, Duration::from_millis(100));

        let bytes = synth.synthesize(&segment(), &CancellationToken::new()).await.unwrap();
        assert_eq!(bytes.len(), 2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bound() {
        let inner = Arc::new(Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
        });
        let synth = RetryingSynthesizer::new(inner.clone(), 1, Duration::from_millis(100));

        let err = synth.synthesize(&segment(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TtsError::SegmentFetch { segment: 1, .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_is_single_attempt() {
        let inner = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let synth = RetryingSynthesizer::new(inner.clone(), 0, Duration::from_millis(100));

        assert!(synth.synthesize(&segment(), &CancellationToken::new()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let inner = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let synth = RetryingSynthesizer::new(inner, 3, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = synth.synthesize(&segment(), &cancel).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
