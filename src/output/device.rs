//! On-device speech synthesis.
//!
//! The actual synthesis engine is pluggable: the host supplies anything that
//! can turn text into mono f32 samples and enumerate its voices. Voice
//! selection is by exact name with a silent fallback to the engine default,
//! so a stale persisted voice id never breaks speech.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use super::playback::{self, PlaybackControl};
use super::{PlaybackOutcome, SpeakOptions, SpeechOutput};
use crate::error::VoiceError;

/// A local text-to-speech engine.
pub trait SynthesisEngine: Send + Sync {
    /// Render `text` as mono f32 samples in the given voice.
    fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<f32>, VoiceError>;

    /// Voice ids this engine offers.
    fn voices(&self) -> Vec<String>;

    /// Voice used when the requested one is unknown.
    fn default_voice(&self) -> String;

    /// Sample rate of the rendered audio.
    fn sample_rate(&self) -> u32;
}

/// Speech output through a local synthesis engine.
pub struct OnDeviceSynthesizer {
    engine: Box<dyn SynthesisEngine>,
    control: Arc<PlaybackControl>,
}

impl OnDeviceSynthesizer {
    pub fn new(engine: Box<dyn SynthesisEngine>) -> Self {
        Self {
            engine,
            control: PlaybackControl::new(),
        }
    }
}

impl SpeechOutput for OnDeviceSynthesizer {
    fn speak(
        &self,
        text: &str,
        options: &SpeakOptions,
    ) -> Pin<Box<dyn Future<Output = Result<PlaybackOutcome, VoiceError>> + Send + '_>> {
        let text = text.to_string();
        let options = options.clone();
        Box::pin(async move {
            let voice = resolve_voice(
                options.voice.as_deref(),
                &self.engine.voices(),
                &self.engine.default_voice(),
            );
            let samples = self.engine.synthesize(&text, &voice)?;
            if samples.is_empty() {
                debug!("Engine produced no audio for utterance, treating as completed");
                return Ok(PlaybackOutcome::Completed);
            }
            playback::play_samples(
                &self.control,
                samples,
                self.engine.sample_rate(),
                options.volume,
                options.rate,
            )
            .await
        })
    }

    fn stop(&self) {
        self.control.interrupt();
    }

    fn name(&self) -> String {
        "on-device synthesizer".to_string()
    }
}

/// Pick the voice to synthesize with: the requested voice when the engine
/// offers it, otherwise the engine default.
pub(crate) fn resolve_voice(requested: Option<&str>, available: &[String], default: &str) -> String {
    match requested {
        Some(name) if available.iter().any(|v| v == name) => name.to_string(),
        Some(name) => {
            debug!("Voice {:?} not offered, using default {:?}", name, default);
            default.to_string()
        }
        None => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn voices() -> Vec<String> {
        vec!["nova".to_string(), "alloy".to_string()]
    }

    struct FakeEngine {
        requested: Mutex<Vec<(String, String)>>,
        samples: Vec<f32>,
        fail: bool,
    }

    impl FakeEngine {
        fn silent() -> Arc<Self> {
            Arc::new(Self {
                requested: Mutex::new(Vec::new()),
                samples: Vec::new(),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                requested: Mutex::new(Vec::new()),
                samples: Vec::new(),
                fail: true,
            })
        }
    }

    impl SynthesisEngine for Arc<FakeEngine> {
        fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<f32>, VoiceError> {
            self.requested
                .lock()
                .unwrap()
                .push((text.to_string(), voice.to_string()));
            if self.fail {
                return Err(VoiceError::Synthesis("engine broke".into()));
            }
            Ok(self.samples.clone())
        }

        fn voices(&self) -> Vec<String> {
            voices()
        }

        fn default_voice(&self) -> String {
            "nova".to_string()
        }

        fn sample_rate(&self) -> u32 {
            16_000
        }
    }

    #[tokio::test]
    async fn empty_synthesis_completes_without_playback() {
        let engine = FakeEngine::silent();
        let sink = OnDeviceSynthesizer::new(Box::new(Arc::clone(&engine)));
        let outcome = sink
            .speak("hello", &SpeakOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, PlaybackOutcome::Completed);
        assert_eq!(
            *engine.requested.lock().unwrap(),
            vec![("hello".to_string(), "nova".to_string())]
        );
    }

    #[tokio::test]
    async fn unknown_voice_resolves_through_speak() {
        let engine = FakeEngine::silent();
        let sink = OnDeviceSynthesizer::new(Box::new(Arc::clone(&engine)));
        let options = SpeakOptions {
            voice: Some("ghost".into()),
            ..SpeakOptions::default()
        };
        sink.speak("hello", &options).await.unwrap();
        assert_eq!(
            engine.requested.lock().unwrap()[0].1,
            "nova".to_string()
        );
    }

    #[tokio::test]
    async fn synthesis_failure_propagates() {
        let engine = FakeEngine::failing();
        let sink = OnDeviceSynthesizer::new(Box::new(Arc::clone(&engine)));
        let err = sink
            .speak("hello", &SpeakOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Synthesis(_)));
    }

    #[test]
    fn known_voice_is_kept() {
        assert_eq!(resolve_voice(Some("alloy"), &voices(), "nova"), "alloy");
    }

    #[test]
    fn unknown_voice_falls_back_to_default() {
        assert_eq!(resolve_voice(Some("ghost"), &voices(), "nova"), "nova");
    }

    #[test]
    fn missing_voice_uses_default() {
        assert_eq!(resolve_voice(None, &voices(), "nova"), "nova");
    }
}
