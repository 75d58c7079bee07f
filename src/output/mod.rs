//! Speech output sinks.
//!
//! Two variants behind a common `SpeechOutput` trait:
//! - `OnDeviceSynthesizer`: local synthesis through a pluggable engine,
//!   with voice lookup by name and silent fallback to the engine default.
//! - `BackendSynthesizer`: text-to-speech through the backend endpoint,
//!   playing the returned audio payload.
//!
//! Both guarantee that stopping mid-utterance silences audio immediately,
//! and a superseded utterance never produces a second completion.

pub mod backend;
pub mod device;
mod playback;

use std::future::Future;
use std::pin::Pin;

use crate::config::VoicePreference;
use crate::error::VoiceError;

pub use backend::BackendSynthesizer;
pub use device::{OnDeviceSynthesizer, SynthesisEngine};

/// Options for a single utterance.
#[derive(Debug, Clone)]
pub struct SpeakOptions {
    /// Voice id; `None` uses the configured preference.
    pub voice: Option<String>,
    /// Playback rate multiplier.
    pub rate: f32,
    /// Playback volume (0.0 to 2.0).
    pub volume: f32,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
            volume: 1.0,
        }
    }
}

/// How an utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Playback ran to the end of the audio.
    Completed,
    /// Playback was interrupted by `stop`.
    Cancelled,
}

/// Common trait for all speech output sinks (dyn-compatible).
pub trait SpeechOutput: Send + Sync {
    /// Synthesize and play `text`, resolving when playback ends or is
    /// cancelled. Errors are synthesis/transport/playback failures; the
    /// caller decides which of those are fatal to the session.
    fn speak(
        &self,
        text: &str,
        options: &SpeakOptions,
    ) -> Pin<Box<dyn Future<Output = Result<PlaybackOutcome, VoiceError>> + Send + '_>>;

    /// Interrupt the current utterance, silencing audio immediately.
    /// No-op when nothing is playing.
    fn stop(&self);

    /// Display name for this sink.
    fn name(&self) -> String;
}

/// Create the speech output sink selected by the user preference.
///
/// `engine` is the host's local synthesis engine, if it has one. When the
/// preference asks for on-device synthesis but no engine is available, this
/// falls back to the backend sink rather than failing construction.
pub fn create_speech_output(
    preference: &VoicePreference,
    base_url: &str,
    engine: Option<Box<dyn SynthesisEngine>>,
) -> Box<dyn SpeechOutput> {
    if preference.use_backend_transcription {
        tracing::info!("Speech output: backend synthesizer");
        return Box::new(BackendSynthesizer::new(base_url, &preference.synthesis_voice));
    }
    match engine {
        Some(engine) => {
            tracing::info!("Speech output: on-device synthesizer");
            Box::new(OnDeviceSynthesizer::new(engine))
        }
        None => {
            tracing::warn!("No local synthesis engine available, falling back to backend synthesis");
            Box::new(BackendSynthesizer::new(base_url, &preference.synthesis_voice))
        }
    }
}
