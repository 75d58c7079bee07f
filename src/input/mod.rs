//! Speech input sources.
//!
//! Two variants behind a common `SpeechInput` trait:
//! - `OnDeviceRecognizer`: continuous recognition fed by the host platform's
//!   recognizer; interim hypotheses replace the running transcript.
//! - `BackendCapture`: push-to-record microphone capture uploaded to the
//!   backend for transcription on stop.
//!
//! The variant is chosen once at session construction from the persisted
//! user preference, never re-checked per call.

pub mod capture;
pub mod recognizer;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::VoicePreference;
use crate::error::VoiceError;

pub use capture::BackendCapture;
pub use recognizer::{OnDeviceRecognizer, RecognizerHandle};

/// Receives interim transcript hypotheses while a source is active.
///
/// Each delivered hypothesis is the full current transcript, not a delta.
pub type TranscriptSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Common trait for all speech input sources (dyn-compatible).
pub trait SpeechInput: Send + Sync {
    /// Begin capturing speech, delivering interim hypotheses to `sink`.
    ///
    /// Starting implicitly stops any prior capture on this source; at most
    /// one is ever active.
    fn start(
        &self,
        sink: TranscriptSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), VoiceError>> + Send + '_>>;

    /// Finish capturing and return the final transcript.
    ///
    /// When the source is not active this returns the last known transcript
    /// unchanged. For backend transcription this awaits the upload round
    /// trip; the result becomes the transcript's final value.
    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<String, VoiceError>> + Send + '_>>;

    /// Whether a capture is currently in flight.
    fn is_active(&self) -> bool;

    /// Display name for this source.
    fn name(&self) -> String;
}

/// Create the speech input source selected by the user preference.
///
/// Returns the recognizer feed handle for the on-device variant so the host
/// can push recognition results into it.
pub fn create_speech_input(
    preference: &VoicePreference,
    base_url: &str,
) -> (Box<dyn SpeechInput>, Option<RecognizerHandle>) {
    if preference.use_backend_transcription {
        tracing::info!("Speech input: backend capture");
        (Box::new(BackendCapture::new(base_url)), None)
    } else {
        tracing::info!("Speech input: on-device recognizer");
        let (source, handle) = OnDeviceRecognizer::new();
        (Box::new(source), Some(handle))
    }
}
