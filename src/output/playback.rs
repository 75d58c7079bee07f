//! Shared playback machinery for the speech output sinks.
//!
//! Playback runs on a blocking thread because `rodio` sinks are driven
//! synchronously. Each utterance registers a cancel token and its sink with
//! the `PlaybackControl` slot; `interrupt` stops the registered sink
//! directly so audio dies immediately, and the token keeps a superseded
//! utterance from being confused with the one that replaced it.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::{Decoder, OutputStream, Sink, Source};
use tracing::debug;

use super::PlaybackOutcome;
use crate::error::VoiceError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

struct ActiveUtterance {
    cancel: Arc<AtomicBool>,
    sink: Option<Arc<Sink>>,
}

/// Interrupt point shared between a sink and its in-flight playback.
pub(crate) struct PlaybackControl {
    current: Mutex<Option<ActiveUtterance>>,
}

impl PlaybackControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(None),
        })
    }

    /// Stop the current utterance, if any. Audio is silenced before this
    /// returns; the playback thread observes the cancel token and winds down
    /// on its own.
    pub fn interrupt(&self) {
        let Ok(mut slot) = self.current.lock() else {
            return;
        };
        if let Some(utterance) = slot.take() {
            utterance.cancel.store(true, Ordering::SeqCst);
            if let Some(sink) = utterance.sink {
                sink.stop();
            }
            debug!("Playback interrupted");
        }
    }

    /// Register a new utterance, superseding any previous one.
    fn begin(&self) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(false));
        if let Ok(mut slot) = self.current.lock() {
            *slot = Some(ActiveUtterance {
                cancel: Arc::clone(&token),
                sink: None,
            });
        }
        token
    }

    /// Attach the sink for the utterance identified by `token`. If that
    /// utterance was already interrupted or superseded, the sink is stopped
    /// on the spot.
    fn attach_sink(&self, token: &Arc<AtomicBool>, sink: Arc<Sink>) {
        let Ok(mut slot) = self.current.lock() else {
            return;
        };
        match slot.as_mut() {
            Some(utterance) if Arc::ptr_eq(&utterance.cancel, token) => {
                utterance.sink = Some(sink);
            }
            _ => sink.stop(),
        }
    }

    /// Clear the slot once the utterance identified by `token` is done.
    fn finish(&self, token: &Arc<AtomicBool>) {
        if let Ok(mut slot) = self.current.lock() {
            if let Some(utterance) = slot.as_ref() {
                if Arc::ptr_eq(&utterance.cancel, token) {
                    *slot = None;
                }
            }
        }
    }
}

/// Play raw mono f32 samples to the default output device.
pub(crate) async fn play_samples(
    control: &Arc<PlaybackControl>,
    samples: Vec<f32>,
    sample_rate: u32,
    volume: f32,
    speed: f32,
) -> Result<PlaybackOutcome, VoiceError> {
    let control = Arc::clone(control);
    let token = control.begin();
    let result = tokio::task::spawn_blocking(move || {
        let outcome = (|| {
            let (_stream, handle) = OutputStream::try_default()
                .map_err(|e| VoiceError::Playback(format!("no audio output device: {}", e)))?;
            let sink = Sink::try_new(&handle)
                .map_err(|e| VoiceError::Playback(format!("failed to create sink: {}", e)))?;
            configure_sink(&sink, volume, speed);
            let sink = Arc::new(sink);
            control.attach_sink(&token, Arc::clone(&sink));

            let source = rodio::buffer::SamplesBuffer::new(1, sample_rate, samples);
            sink.append(source);
            Ok(drain(&token, &sink))
        })();
        control.finish(&token);
        outcome
    })
    .await
    .map_err(|e| VoiceError::Playback(format!("playback task failed: {}", e)))?;
    result
}

/// Decode and play an encoded audio payload (mp3/wav) to the default
/// output device.
pub(crate) async fn play_encoded(
    control: &Arc<PlaybackControl>,
    bytes: Vec<u8>,
    volume: f32,
    speed: f32,
) -> Result<PlaybackOutcome, VoiceError> {
    let control = Arc::clone(control);
    let token = control.begin();
    let result = tokio::task::spawn_blocking(move || {
        let outcome = (|| {
            let source = Decoder::new(Cursor::new(bytes))
                .map_err(|e| VoiceError::Synthesis(format!("undecodable audio payload: {}", e)))?;
            let (_stream, handle) = OutputStream::try_default()
                .map_err(|e| VoiceError::Playback(format!("no audio output device: {}", e)))?;
            let sink = Sink::try_new(&handle)
                .map_err(|e| VoiceError::Playback(format!("failed to create sink: {}", e)))?;
            configure_sink(&sink, volume, speed);
            let sink = Arc::new(sink);
            control.attach_sink(&token, Arc::clone(&sink));

            sink.append(source.convert_samples::<f32>());
            Ok(drain(&token, &sink))
        })();
        control.finish(&token);
        outcome
    })
    .await
    .map_err(|e| VoiceError::Playback(format!("playback task failed: {}", e)))?;
    result
}

fn configure_sink(sink: &Sink, volume: f32, speed: f32) {
    sink.set_volume(volume.clamp(0.0, 2.0));
    if (speed - 1.0).abs() > f32::EPSILON {
        sink.set_speed(speed.max(0.1));
    }
}

/// Block until the sink drains or the cancel token trips.
fn drain(token: &AtomicBool, sink: &Sink) -> PlaybackOutcome {
    while !sink.empty() {
        if token.load(Ordering::SeqCst) {
            sink.stop();
            return PlaybackOutcome::Cancelled;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    if token.load(Ordering::SeqCst) {
        PlaybackOutcome::Cancelled
    } else {
        PlaybackOutcome::Completed
    }
}
