//! Backend speech synthesis.
//!
//! Sends the utterance text to the storefront backend's text-to-speech
//! endpoint and plays the returned audio payload. Request failures are
//! transport errors; an undecodable payload is a synthesis error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use super::playback::{self, PlaybackControl};
use super::{PlaybackOutcome, SpeakOptions, SpeechOutput};
use crate::error::VoiceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Speech output through the backend text-to-speech endpoint.
pub struct BackendSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    default_voice: String,
    control: Arc<PlaybackControl>,
}

impl BackendSynthesizer {
    pub fn new(base_url: &str, default_voice: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: format!("{}/api/v1/voice/text-to-speech", base_url.trim_end_matches('/')),
            default_voice: default_voice.to_string(),
            control: PlaybackControl::new(),
        }
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, VoiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "text": text, "voice": voice }))
            .send()
            .await
            .map_err(|e| VoiceError::Transport(format!("text-to-speech request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VoiceError::Transport(format!(
                "text-to-speech request returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Transport(format!("failed to read audio payload: {}", e)))?;
        debug!("Received {} bytes of synthesized audio", bytes.len());
        Ok(bytes.to_vec())
    }
}

impl SpeechOutput for BackendSynthesizer {
    fn speak(
        &self,
        text: &str,
        options: &SpeakOptions,
    ) -> Pin<Box<dyn Future<Output = Result<PlaybackOutcome, VoiceError>> + Send + '_>> {
        let text = text.to_string();
        let options = options.clone();
        Box::pin(async move {
            let voice = options
                .voice
                .clone()
                .unwrap_or_else(|| self.default_voice.clone());
            let bytes = self.synthesize(&text, &voice).await?;
            if bytes.is_empty() {
                return Err(VoiceError::Synthesis(
                    "backend returned an empty audio payload".into(),
                ));
            }
            playback::play_encoded(&self.control, bytes, options.volume, options.rate).await
        })
    }

    fn stop(&self) {
        self.control.interrupt();
    }

    fn name(&self) -> String {
        "backend synthesizer".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_built_from_base_url() {
        let sink = BackendSynthesizer::new("http://localhost:8000/", "nova");
        assert_eq!(
            sink.endpoint,
            "http://localhost:8000/api/v1/voice/text-to-speech"
        );
    }
}
