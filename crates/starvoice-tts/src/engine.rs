//! Session controller: the public face of the playback engine.
//!
//! One [`SpeechEngine`] is built at application start and cloned into every
//! caller that wants to speak. It owns the only output timeline, so starting
//! a new reading always stops whatever was playing:
//!
//! ```text
//!   Idle → Loading(id) → Playing(id) → Idle
//!            │               │
//!            └──→ Error ←────┘        stop(): * → Idle
//! ```
//!
//! Each session gets a [`CancellationToken`] and a generation number. The
//! token is checked around every suspension point of the pipeline; the
//! generation guards every state write, so a superseded pipeline can never
//! publish state or attach audio after its successor started.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::decode::{self, DecodeError, DecodedAudioBuffer};
use crate::device::{AudioFormat, DeviceContext, OutputDevice};
use crate::error::TtsError;
use crate::schedule::PlaybackScheduler;
use crate::synth::{RetryingSynthesizer, SpeechSynthesizer};
use crate::text::{Chunker, Segment};

// ── Engine state ───────────────────────────────────────────────────

/// Externally visible engine state, shared by every caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum EngineState {
    /// Nothing requested or playing.
    #[default]
    Idle,

    /// Text accepted, no audio scheduled yet.
    #[serde(rename_all = "camelCase")]
    Loading { session_id: String },

    /// At least one buffer is scheduled on the device.
    #[serde(rename_all = "camelCase")]
    Playing { session_id: String },

    /// The last session failed as a whole.
    Error { message: String },
}

impl EngineState {
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        matches!(self, Self::Playing { .. })
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    /// Caller-supplied id of the live session, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Loading { session_id } | Self::Playing { session_id } => Some(session_id),
            Self::Idle | Self::Error { .. } => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// How a [`SpeechEngine::play`] call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    /// Nothing speakable in the text; the engine stayed idle.
    Empty,

    /// Every segment was handled and at least one is on the timeline.
    Scheduled {
        segments: usize,
        skipped: usize,
        duration: Duration,
    },

    /// A later `play` or a `stop` took over before the pipeline finished.
    Superseded,

    /// [`SpeechEngine::toggle`] stopped the caller's own session.
    Stopped,
}

// ── Session bookkeeping ────────────────────────────────────────────

struct ActiveSession {
    generation: u64,
    session_id: String,
    cancel: CancellationToken,
    scheduler: Option<Arc<PlaybackScheduler>>,
}

impl ActiveSession {
    /// Cancel, stop every source, close the context.
    fn teardown(self) {
        self.cancel.cancel();
        if let Some(scheduler) = self.scheduler {
            scheduler.stop_all();
            scheduler.close();
        }
        debug!(session = %self.session_id, generation = self.generation, "Session torn down");
    }
}

/// Identity a pipeline carries to prove it is still the live session.
#[derive(Clone)]
struct SessionTicket {
    generation: u64,
    session_id: String,
    cancel: CancellationToken,
}

struct Inner {
    config: EngineConfig,
    chunker: Chunker,
    format: AudioFormat,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    device: Arc<dyn OutputDevice>,
    state: watch::Sender<EngineState>,
    session: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, new_state: EngineState) {
        self.state.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            debug!(old = ?state, new = ?new_state, "Engine state transition");
            *state = new_state;
            true
        });
    }

    fn is_current(session: Option<&ActiveSession>, generation: u64) -> bool {
        session.is_some_and(|s| s.generation == generation)
    }

    /// Tear down whatever session is live and return to `Idle`.
    fn stop(&self) {
        let mut session = self.session();
        if let Some(active) = session.take() {
            info!(session = %active.session_id, "Stopping playback");
            active.teardown();
        }
        self.set_state(EngineState::Idle);
    }

    /// Stop the previous session and, for non-empty input, register a new one.
    fn begin(&self, session_id: String, has_segments: bool) -> Option<SessionTicket> {
        let mut session = self.session();
        if let Some(previous) = session.take() {
            info!(
                previous = %previous.session_id,
                next = %session_id,
                "Superseding playback session"
            );
            previous.teardown();
        }
        self.set_state(EngineState::Idle);

        if !has_segments {
            return None;
        }

        let ticket = SessionTicket {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            session_id,
            cancel: CancellationToken::new(),
        };
        *session = Some(ActiveSession {
            generation: ticket.generation,
            session_id: ticket.session_id.clone(),
            cancel: ticket.cancel.clone(),
            scheduler: None,
        });
        self.set_state(EngineState::Loading {
            session_id: ticket.session_id.clone(),
        });
        Some(ticket)
    }

    /// Hand the session its scheduler. `false` if it was superseded first.
    fn attach_scheduler(&self, generation: u64, scheduler: &Arc<PlaybackScheduler>) -> bool {
        let mut session = self.session();
        match session.as_mut() {
            Some(active) if active.generation == generation => {
                active.scheduler = Some(Arc::clone(scheduler));
                true
            }
            _ => false,
        }
    }

    /// Publish `new_state` only if `generation` is still live.
    fn transition(&self, generation: u64, new_state: EngineState) -> bool {
        let session = self.session();
        if Self::is_current(session.as_ref(), generation) {
            self.set_state(new_state);
            true
        } else {
            false
        }
    }

    /// Natural end of playback.
    fn finish(&self, generation: u64) {
        let mut session = self.session();
        if !Self::is_current(session.as_ref(), generation) {
            return;
        }
        if let Some(active) = session.take() {
            info!(session = %active.session_id, "Playback finished");
            active.teardown();
        }
        self.set_state(EngineState::Idle);
    }

    /// Session-level failure: release everything, then surface the error.
    fn fail(&self, generation: u64, err: &TtsError) {
        let mut session = self.session();
        if !Self::is_current(session.as_ref(), generation) {
            return;
        }
        if let Some(active) = session.take() {
            error!(session = %active.session_id, error = %err, "Playback session failed");
            active.teardown();
        }
        self.set_state(EngineState::Error {
            message: err.user_message(),
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = session {
            active.teardown();
        }
    }
}

// ── Speech engine ──────────────────────────────────────────────────

/// Process-wide text-to-speech playback service.
///
/// Cheap to clone; all clones drive the same session and state.
#[derive(Clone)]
pub struct SpeechEngine {
    inner: Arc<Inner>,
}

impl SpeechEngine {
    /// Build the engine. With `segment_retries > 0` the synthesizer is
    /// wrapped in a [`RetryingSynthesizer`].
    pub fn new(
        config: EngineConfig,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        device: Arc<dyn OutputDevice>,
    ) -> Result<Self, TtsError> {
        config.validate()?;

        let synthesizer: Arc<dyn SpeechSynthesizer> = if config.segment_retries > 0 {
            Arc::new(RetryingSynthesizer::new(
                synthesizer,
                config.segment_retries,
                config.retry_backoff(),
            ))
        } else {
            synthesizer
        };

        let (state, _) = watch::channel(EngineState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                chunker: Chunker::new(config.max_chunk_chars),
                format: AudioFormat {
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                },
                config,
                synthesizer,
                device,
                state,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }

    // ── Observation ────────────────────────────────────────────────

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.inner.state.borrow().is_playing()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    #[must_use]
    pub fn currently_playing_id(&self) -> Option<String> {
        self.inner.state.borrow().session_id().map(ToString::to_string)
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error().map(ToString::to_string)
    }

    /// Whether `session_id` owns the live session.
    #[must_use]
    pub fn is_active_player(&self, session_id: &str) -> bool {
        self.inner.state.borrow().session_id() == Some(session_id)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Split text the way [`play`](Self::play) would, without speaking it.
    #[must_use]
    pub fn chunk(&self, text: &str) -> Vec<Segment> {
        self.inner.chunker.chunk(text)
    }

    // ── Control ────────────────────────────────────────────────────

    /// Speak `text`, replacing any session in progress.
    ///
    /// Resolves once every segment has been fetched, decoded and scheduled
    /// (or skipped). The audio keeps playing afterwards; its natural end
    /// moves the engine back to `Idle`. A session-level failure is returned
    /// here and also published as [`EngineState::Error`]. Being superseded
    /// is not an error.
    pub async fn play(
        &self,
        text: &str,
        session_id: impl Into<String>,
    ) -> Result<PlayOutcome, TtsError> {
        let segments = self.inner.chunker.chunk(text);
        let Some(ticket) = self.inner.begin(session_id.into(), !segments.is_empty()) else {
            debug!("Nothing speakable in text, staying idle");
            return Ok(PlayOutcome::Empty);
        };

        info!(
            session = %ticket.session_id,
            segments = segments.len(),
            text_len = text.len(),
            "Starting playback session"
        );

        // The session runs and settles on its own task, so a caller that
        // drops this future still gets the state published and torn down.
        tokio::spawn(run_session(Arc::clone(&self.inner), ticket, segments))
            .await
            .unwrap_or_else(|e| Err(TtsError::Pipeline(e.to_string())))
    }

    /// Stop whatever is playing and return to `Idle`. Safe to call at any
    /// time, any number of times.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Stop if `session_id` is the live session, otherwise play it.
    pub async fn toggle(
        &self,
        text: &str,
        session_id: impl Into<String>,
    ) -> Result<PlayOutcome, TtsError> {
        let session_id = session_id.into();
        if self.is_active_player(&session_id) {
            self.stop();
            return Ok(PlayOutcome::Stopped);
        }
        self.play(text, session_id).await
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Run the pipeline and settle its result against the session state.
async fn run_session(
    inner: Arc<Inner>,
    ticket: SessionTicket,
    segments: Vec<Segment>,
) -> Result<PlayOutcome, TtsError> {
    let result = tokio::spawn(run_pipeline(Arc::clone(&inner), ticket.clone(), segments))
        .await
        .unwrap_or_else(|e| Err(TtsError::Pipeline(e.to_string())));

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_cancellation() || ticket.cancel.is_cancelled() => {
            debug!(session = %ticket.session_id, error = %e, "Pipeline ended by cancellation");
            Ok(PlayOutcome::Superseded)
        }
        Err(e) => {
            inner.fail(ticket.generation, &e);
            Err(e)
        }
    }
}

/// Fetch → decode → schedule, one segment at a time, in text order.
async fn run_pipeline(
    inner: Arc<Inner>,
    ticket: SessionTicket,
    segments: Vec<Segment>,
) -> Result<PlayOutcome, TtsError> {
    let cancel = &ticket.cancel;
    let total = segments.len();

    let ctx = inner.device.open(inner.format)?;
    let scheduler = Arc::new(PlaybackScheduler::new(ctx, inner.config.lead_in()));
    if !inner.attach_scheduler(ticket.generation, &scheduler) {
        scheduler.close();
        return Err(TtsError::Cancelled);
    }

    let mut scheduled = 0_usize;
    let mut skipped = 0_usize;
    let mut duration = Duration::ZERO;

    for segment in &segments {
        let bytes = match fetch(&inner, segment, cancel).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_segment_local() => {
                skipped += 1;
                warn!(
                    segment = segment.index,
                    total,
                    error = %e,
                    "Failed to synthesise segment, skipping"
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        let buffer = match decode_on(scheduler.context(), segment, bytes, inner.format, cancel).await
        {
            Ok(buffer) => buffer,
            Err(e) if e.is_segment_local() => {
                skipped += 1;
                warn!(segment = segment.index, total, error = %e, "Failed to decode segment, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };

        if cancel.is_cancelled() {
            return Err(TtsError::Cancelled);
        }

        let segment_duration = buffer.duration();
        let slot = scheduler.schedule(buffer)?;
        scheduled += 1;
        duration += segment_duration;

        debug!(
            segment = segment.index,
            total,
            start = slot.start,
            duration_ms = segment_duration.as_millis(),
            "Scheduled segment"
        );

        if scheduled == 1 {
            inner.transition(
                ticket.generation,
                EngineState::Playing {
                    session_id: ticket.session_id.clone(),
                },
            );
        }
    }

    if scheduled == 0 {
        return Err(TtsError::TotalSynthesisFailure { segments: total });
    }

    if skipped > 0 {
        warn!(
            skipped,
            total, "Synthesis completed with segment failures, audio may be incomplete"
        );
    }

    spawn_drain_watcher(Arc::clone(&inner), &ticket, scheduler);

    Ok(PlayOutcome::Scheduled {
        segments: scheduled,
        skipped,
        duration,
    })
}

async fn fetch(
    inner: &Inner,
    segment: &Segment,
    cancel: &CancellationToken,
) -> Result<Bytes, TtsError> {
    if cancel.is_cancelled() {
        return Err(TtsError::Cancelled);
    }

    let bytes = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(TtsError::Cancelled),
        result = inner.synthesizer.synthesize(segment, cancel) => result?,
    };

    if cancel.is_cancelled() {
        return Err(TtsError::Cancelled);
    }
    if bytes.is_empty() {
        return Err(TtsError::EmptyAudio {
            segment: segment.index,
        });
    }
    Ok(bytes)
}

async fn decode_on(
    ctx: &Arc<dyn DeviceContext>,
    segment: &Segment,
    bytes: Bytes,
    format: AudioFormat,
    cancel: &CancellationToken,
) -> Result<DecodedAudioBuffer, TtsError> {
    let ctx = Arc::clone(ctx);
    let task = tokio::task::spawn_blocking(move || decode::decode(ctx.as_ref(), &bytes, format));

    let decoded = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(TtsError::Cancelled),
        joined = task => joined.map_err(|e| TtsError::Pipeline(e.to_string()))?,
    };

    if cancel.is_cancelled() {
        return Err(TtsError::Cancelled);
    }

    decoded.map_err(|e| match e {
        DecodeError::ContextClosed => TtsError::DeviceClosed,
        other => TtsError::SegmentDecode {
            segment: segment.index,
            message: other.to_string(),
        },
    })
}

/// Watch for the attached set to drain, then end the session.
fn spawn_drain_watcher(inner: Arc<Inner>, ticket: &SessionTicket, scheduler: Arc<PlaybackScheduler>) {
    let cancel = ticket.cancel.clone();
    let generation = ticket.generation;
    let grace = inner.config.drain_grace();

    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = scheduler.wait_drained(grace) => inner.finish(generation),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_helpers() {
        let playing = EngineState::Playing {
            session_id: "reading-1".into(),
        };
        assert!(playing.is_playing());
        assert!(!playing.is_loading());
        assert_eq!(playing.session_id(), Some("reading-1"));
        assert_eq!(playing.error(), None);

        let failed = EngineState::Error {
            message: "boom".into(),
        };
        assert_eq!(failed.session_id(), None);
        assert_eq!(failed.error(), Some("boom"));
        assert_eq!(EngineState::default(), EngineState::Idle);
    }

    #[test]
    fn state_serializes_with_status_tag() {
        let json = serde_json::to_value(EngineState::Loading {
            session_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "status": "loading", "sessionId": "abc" }));

        let json = serde_json::to_value(EngineState::Idle).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "idle" }));
    }
}
