//! Live playback on the default output device via `rodio`.
//!
//! `rodio::OutputStream` is `!Send` on some platforms (macOS CoreAudio,
//! etc.). Each context therefore confines its stream to a dedicated OS
//! thread that lives until the context is closed; only the `Send + Sync`
//! `OutputStreamHandle` crosses back to the caller.
//!
//! Every attached buffer gets its own `Sink`, so sources can be stopped
//! individually. A sink plays leading silence up to the requested start
//! time, then the buffer, then an empty callback source that reports the
//! natural end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::source::{EmptyCallback, Zero};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};

use super::{AudioFormat, DeviceContext, EndedCallback, OutputDevice, SourceHandle};
use crate::decode::DecodedAudioBuffer;
use crate::error::TtsError;

/// [`OutputDevice`] for the system's default audio output.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOutputDevice;

impl OutputDevice for LocalOutputDevice {
    fn open(&self, format: AudioFormat) -> Result<Arc<dyn DeviceContext>, TtsError> {
        Ok(Arc::new(LocalContext::spawn(format)?))
    }
}

/// An open output stream plus its clock.
pub struct LocalContext {
    format: AudioFormat,
    handle: OutputStreamHandle,
    epoch: Instant,
    closed: AtomicBool,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LocalContext {
    /// Spawn the stream thread and wait for it to open the device.
    fn spawn(format: AudioFormat) -> Result<Self, TtsError> {
        let (init_tx, init_rx) = mpsc::channel::<Result<OutputStreamHandle, TtsError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("starvoice-audio".into())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = init_tx.send(Err(TtsError::DeviceUnavailable(e.to_string())));
                        return;
                    }
                };
                if init_tx.send(Ok(handle)).is_err() {
                    return;
                }
                // Blocks until close() sends or drops the sender.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("Audio output thread shutting down");
            })
            .map_err(|e| TtsError::DeviceUnavailable(format!("failed to spawn audio thread: {e}")))?;

        let handle = init_rx.recv().map_err(|_| {
            TtsError::DeviceUnavailable("audio thread exited during initialisation".into())
        })??;

        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio output opened on default device"
        );

        Ok(Self {
            format,
            handle,
            epoch: Instant::now(),
            closed: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl DeviceContext for LocalContext {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn start_source(
        &self,
        buffer: DecodedAudioBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn SourceHandle>, TtsError> {
        if self.is_closed() {
            return Err(TtsError::DeviceClosed);
        }

        let sink =
            Sink::try_new(&self.handle).map_err(|e| TtsError::DeviceUnavailable(e.to_string()))?;

        let format = buffer.format();
        let delay = (when - self.current_time()).max(0.0);
        if delay > 0.0 {
            sink.append(
                Zero::<f32>::new(format.channels, format.sample_rate)
                    .take_duration(Duration::from_secs_f64(delay)),
            );
        }
        sink.append(SamplesBuffer::new(
            format.channels,
            format.sample_rate,
            buffer.into_samples(),
        ));

        // rodio wants a reusable `Fn`; the slot makes it fire at most once.
        let slot = Mutex::new(Some(on_ended));
        sink.append(EmptyCallback::<f32>::new(Box::new(move || {
            let callback = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(callback) = callback {
                callback();
            }
        })));

        Ok(Box::new(LocalSource { sink }))
    }

    fn close(&self) -> Result<(), TtsError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(tx) = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            thread
                .join()
                .map_err(|_| TtsError::DeviceUnavailable("audio thread panicked".into()))?;
        }

        tracing::debug!("Audio output closed");
        Ok(())
    }
}

impl Drop for LocalContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Dropping a rodio `Sink` silences it, so the handle owns the sink for as
/// long as the scheduler tracks the source.
struct LocalSource {
    sink: Sink,
}

impl SourceHandle for LocalSource {
    fn stop(&mut self) -> Result<(), TtsError> {
        self.sink.stop();
        Ok(())
    }
}
