//! Playback scheduler: gapless placement of buffers on the device clock.
//!
//! [`Timeline`] is the pure arithmetic: each buffer starts where the
//! previous one ended, never before the device's current time.
//! [`PlaybackScheduler`] applies it to one [`DeviceContext`], owns the set
//! of attached sources, and tells the engine when that set has drained.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;

use crate::decode::DecodedAudioBuffer;
use crate::device::{DeviceContext, SourceHandle};
use crate::error::TtsError;

/// Where one buffer sits on the device timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub start: f64,
    pub end: f64,
}

/// Monotonic "next available start time" for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    next_start: f64,
}

impl Timeline {
    /// Start the timeline `lead_in` after `now`.
    #[must_use]
    pub fn new(now: f64, lead_in: Duration) -> Self {
        Self {
            next_start: now + lead_in.as_secs_f64(),
        }
    }

    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Slot for a buffer of `duration` seconds, without committing it.
    #[must_use]
    pub fn peek(&self, now: f64, duration: f64) -> Slot {
        let start = self.next_start.max(now);
        Slot {
            start,
            end: start + duration,
        }
    }

    /// Reserve the next slot and advance the timeline past it.
    pub fn place(&mut self, now: f64, duration: f64) -> Slot {
        let slot = self.peek(now, duration);
        self.next_start = slot.end;
        slot
    }
}

/// Attached sources, keyed by a per-scheduler id.
///
/// An entry is inserted as `None` before the device sees the buffer and
/// filled with the handle afterwards, so an `on_ended` that fires during
/// `start_source` still finds (and removes) it.
#[derive(Default)]
struct SourceSet {
    entries: Mutex<HashMap<u64, Option<Box<dyn SourceHandle>>>>,
    changed: Notify,
}

impl SourceSet {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Option<Box<dyn SourceHandle>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        let removed = self.lock().remove(&id);
        if removed.is_some() {
            self.changed.notify_one();
        }
    }
}

/// Owns one device context's timeline and attached sources.
pub struct PlaybackScheduler {
    ctx: Arc<dyn DeviceContext>,
    timeline: Mutex<Timeline>,
    sources: Arc<SourceSet>,
    next_id: AtomicU64,
}

impl PlaybackScheduler {
    /// Bind to a freshly opened context; the first buffer starts `lead_in`
    /// after the context's current time.
    pub fn new(ctx: Arc<dyn DeviceContext>, lead_in: Duration) -> Self {
        let timeline = Timeline::new(ctx.current_time(), lead_in);
        Self {
            ctx,
            timeline: Mutex::new(timeline),
            sources: Arc::new(SourceSet::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The context this scheduler plays into.
    #[must_use]
    pub fn context(&self) -> &Arc<dyn DeviceContext> {
        &self.ctx
    }

    /// Attach `buffer` right after everything scheduled before it.
    pub fn schedule(&self, buffer: DecodedAudioBuffer) -> Result<Slot, TtsError> {
        if self.ctx.is_closed() {
            return Err(TtsError::DeviceClosed);
        }

        let mut timeline = self.timeline.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.ctx.current_time();
        let duration = buffer.duration_secs();
        let slot = timeline.peek(now, duration);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sources.lock().insert(id, None);

        let set: Weak<SourceSet> = Arc::downgrade(&self.sources);
        let on_ended = Box::new(move || {
            if let Some(set) = set.upgrade() {
                set.remove(id);
            }
        });

        match self.ctx.start_source(buffer, slot.start, on_ended) {
            Ok(handle) => {
                timeline.place(now, duration);
                // No entry means it already ended or stop_all() ran meanwhile;
                // the handle is dropped either way.
                if let Some(entry) = self.sources.lock().get_mut(&id) {
                    *entry = Some(handle);
                }
                tracing::trace!(source = id, start = slot.start, end = slot.end, "Source attached");
                Ok(slot)
            }
            Err(e) => {
                self.sources.remove(id);
                Err(e)
            }
        }
    }

    /// Number of attached sources that have not finished.
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.sources.lock().len()
    }

    /// Where the next buffer would start.
    #[must_use]
    pub fn next_start(&self) -> f64 {
        self.timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_start()
    }

    /// Resolve once the attached set has been empty for `grace`.
    ///
    /// The grace period absorbs a buffer finishing just as the next one is
    /// about to be attached.
    pub async fn wait_drained(&self, grace: Duration) {
        loop {
            let changed = self.sources.changed.notified();
            if self.active_sources() == 0 {
                tokio::time::sleep(grace).await;
                if self.active_sources() == 0 {
                    return;
                }
                continue;
            }
            changed.await;
        }
    }

    /// Stop and detach every tracked source. Errors from sources that
    /// already finished are ignored.
    pub fn stop_all(&self) {
        let handles: Vec<_> = self.sources.lock().drain().filter_map(|(_, h)| h).collect();
        let stopped = handles.len();
        for mut handle in handles {
            if let Err(e) = handle.stop() {
                tracing::debug!(error = %e, "Ignoring error stopping source");
            }
        }
        self.sources.changed.notify_one();
        if stopped > 0 {
            tracing::debug!(stopped, "Stopped scheduled sources");
        }
    }

    /// Close the device context, logging (not propagating) failures.
    pub fn close(&self) {
        if let Err(e) = self.ctx.close() {
            tracing::warn!(error = %e, "Failed to close audio device context");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::render::RenderContext;
    use crate::device::AudioFormat;

    const EPS: f64 = 1e-9;

    #[test]
    fn timeline_is_back_to_back() {
        let mut timeline = Timeline::new(2.0, Duration::from_millis(100));
        let durations = [1.5, 0.25, 3.0, 0.125];

        let slots: Vec<Slot> = durations.iter().map(|&d| timeline.place(2.0, d)).collect();

        assert!((slots[0].start - 2.1).abs() < EPS);
        for pair in slots.windows(2) {
            assert!((pair[1].start - pair[0].end).abs() < EPS, "gap or overlap: {pair:?}");
        }
        assert!((timeline.next_start() - (2.1 + 4.875)).abs() < EPS);
    }

    #[test]
    fn timeline_never_starts_in_the_past() {
        let mut timeline = Timeline::new(0.0, Duration::from_millis(100));
        timeline.place(0.0, 1.0);

        // Device clock ran past the queued audio (slow fetch).
        let slot = timeline.place(5.0, 2.0);
        assert!((slot.start - 5.0).abs() < EPS);
        assert!((timeline.next_start() - 7.0).abs() < EPS);
    }

    #[test]
    fn peek_does_not_advance() {
        let timeline = Timeline::new(0.0, Duration::ZERO);
        let _ = timeline.peek(0.0, 10.0);
        assert!(timeline.next_start().abs() < EPS);
    }

    fn scheduler() -> PlaybackScheduler {
        let ctx: Arc<dyn DeviceContext> = Arc::new(RenderContext::new(AudioFormat::SPEECH, None));
        PlaybackScheduler::new(ctx, Duration::from_millis(100))
    }

    #[test]
    fn schedule_places_buffers_gaplessly() {
        let scheduler = scheduler();
        let one_second = DecodedAudioBuffer::new(vec![0.0; 24_000], AudioFormat::SPEECH);

        let first = scheduler.schedule(one_second.clone()).unwrap();
        let second = scheduler.schedule(one_second).unwrap();

        assert!((first.start - 0.1).abs() < EPS);
        assert!((second.start - first.end).abs() < EPS);
        assert!((scheduler.next_start() - 2.1).abs() < EPS);
    }

    #[test]
    fn synchronously_ended_sources_leave_set_empty() {
        let scheduler = scheduler();
        scheduler
            .schedule(DecodedAudioBuffer::new(vec![0.0; 240], AudioFormat::SPEECH))
            .unwrap();
        assert_eq!(scheduler.active_sources(), 0);
    }

    #[test]
    fn schedule_on_closed_context_fails_without_advancing() {
        let scheduler = scheduler();
        scheduler.close();
        let err = scheduler
            .schedule(DecodedAudioBuffer::new(vec![0.0; 240], AudioFormat::SPEECH))
            .unwrap_err();
        assert!(matches!(err, TtsError::DeviceClosed));
        assert!((scheduler.next_start() - 0.1).abs() < EPS);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_set_drains_after_grace() {
        let scheduler = scheduler();
        let started = tokio::time::Instant::now();
        scheduler.wait_drained(Duration::from_millis(150)).await;
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
