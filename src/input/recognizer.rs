//! On-device continuous recognition source.
//!
//! The host platform owns the actual recognizer; the storefront shell
//! forwards its recognition results through `RecognizerHandle`. Each result
//! carries the full current hypothesis and replaces the running transcript,
//! so downstream consumers only ever see the latest complete text.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{SpeechInput, TranscriptSink};
use crate::error::VoiceError;

struct RecognizerShared {
    /// Host has declared a working recognizer.
    available: AtomicBool,
    /// A listening turn is in flight.
    active: AtomicBool,
    /// Latest full hypothesis for the current (or last) turn.
    hypothesis: Mutex<String>,
    /// Sink for the current turn, if any.
    sink: Mutex<Option<TranscriptSink>>,
}

/// Continuous recognition source fed by the host recognizer.
pub struct OnDeviceRecognizer {
    shared: Arc<RecognizerShared>,
}

/// Feed side of the recognizer, held by the host integration.
#[derive(Clone)]
pub struct RecognizerHandle {
    shared: Arc<RecognizerShared>,
}

impl OnDeviceRecognizer {
    /// Create the source together with its feed handle.
    pub fn new() -> (Self, RecognizerHandle) {
        let shared = Arc::new(RecognizerShared {
            available: AtomicBool::new(true),
            active: AtomicBool::new(false),
            hypothesis: Mutex::new(String::new()),
            sink: Mutex::new(None),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            RecognizerHandle { shared },
        )
    }
}

impl RecognizerHandle {
    /// Push a recognition result. Replaces the running hypothesis and
    /// notifies the active sink; ignored when no turn is in flight.
    pub fn push_hypothesis(&self, text: &str) {
        if !self.shared.active.load(Ordering::Acquire) {
            debug!("Recognition result ignored: no listening turn in flight");
            return;
        }
        if let Ok(mut hypothesis) = self.shared.hypothesis.lock() {
            hypothesis.clear();
            hypothesis.push_str(text);
        }
        if let Ok(sink) = self.shared.sink.lock() {
            if let Some(sink) = sink.as_ref() {
                sink(text);
            }
        }
    }

    /// Declare whether the host recognizer is usable. Starting while
    /// unavailable fails with `UnsupportedFeature`.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
    }

    /// Whether a listening turn is in flight.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }
}

impl SpeechInput for OnDeviceRecognizer {
    fn start(
        &self,
        sink: TranscriptSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), VoiceError>> + Send + '_>> {
        Box::pin(async move {
            if !self.shared.available.load(Ordering::Acquire) {
                return Err(VoiceError::UnsupportedFeature(
                    "speech recognition is not available on this host".into(),
                ));
            }
            // Restarting resets the turn; any prior sink is dropped.
            if let Ok(mut hypothesis) = self.shared.hypothesis.lock() {
                hypothesis.clear();
            }
            if let Ok(mut slot) = self.shared.sink.lock() {
                *slot = Some(sink);
            }
            self.shared.active.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<String, VoiceError>> + Send + '_>> {
        Box::pin(async move {
            let was_active = self.shared.active.swap(false, Ordering::AcqRel);
            if was_active {
                if let Ok(mut slot) = self.shared.sink.lock() {
                    *slot = None;
                }
            }
            let hypothesis = self
                .shared
                .hypothesis
                .lock()
                .map(|h| h.clone())
                .unwrap_or_default();
            Ok(hypothesis)
        })
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    fn name(&self) -> String {
        "on-device recognizer".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interim_results_replace_not_append() {
        let (source, handle) = OnDeviceRecognizer::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink: TranscriptSink = Arc::new(move |text| {
            seen_clone.lock().unwrap().push(text.to_string());
        });

        source.start(sink).await.unwrap();
        handle.push_hypothesis("find silk");
        handle.push_hypothesis("find silk sarees");

        let final_text = source.stop().await.unwrap();
        assert_eq!(final_text, "find silk sarees");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["find silk".to_string(), "find silk sarees".to_string()]
        );
    }

    #[tokio::test]
    async fn stop_when_inactive_returns_last_hypothesis() {
        let (source, handle) = OnDeviceRecognizer::new();
        let sink: TranscriptSink = Arc::new(|_| {});
        source.start(sink).await.unwrap();
        handle.push_hypothesis("show my cart");
        assert_eq!(source.stop().await.unwrap(), "show my cart");
        // Second stop is a no-op returning the same text.
        assert_eq!(source.stop().await.unwrap(), "show my cart");
    }

    #[tokio::test]
    async fn results_ignored_when_not_listening() {
        let (source, handle) = OnDeviceRecognizer::new();
        handle.push_hypothesis("stray result");
        assert_eq!(source.stop().await.unwrap(), "");
    }

    #[tokio::test]
    async fn unavailable_recognizer_fails_start() {
        let (source, handle) = OnDeviceRecognizer::new();
        handle.set_available(false);
        let sink: TranscriptSink = Arc::new(|_| {});
        let err = source.start(sink).await.unwrap_err();
        assert!(matches!(err, VoiceError::UnsupportedFeature(_)));
    }

    #[tokio::test]
    async fn restart_resets_hypothesis() {
        let (source, handle) = OnDeviceRecognizer::new();
        let sink: TranscriptSink = Arc::new(|_| {});
        source.start(Arc::clone(&sink)).await.unwrap();
        handle.push_hypothesis("first turn");
        source.stop().await.unwrap();

        source.start(sink).await.unwrap();
        assert_eq!(source.stop().await.unwrap(), "");
    }
}
