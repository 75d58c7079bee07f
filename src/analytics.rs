//! Consent-gated usage analytics.
//!
//! Every event passes the consent gate before anything is built or sent;
//! without consent nothing leaves the process. Submission is fire-and-forget
//! on a background task, and failures only ever produce a debug log. Voice
//! flows must never stall or break because analytics is down.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::{self, ConsentRecord, PreferenceStore};
use crate::error::VoiceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A single analytics event on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: String,
    pub event_type: String,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Decides whether analytics may be recorded at all.
pub trait ConsentGate: Send + Sync {
    fn allowed(&self) -> bool;
}

/// Consent gate backed by the persisted consent record.
pub struct StoredConsentGate {
    allowed: AtomicBool,
    store: Arc<PreferenceStore>,
}

impl StoredConsentGate {
    pub fn new(store: Arc<PreferenceStore>) -> Self {
        let record = config::load_consent(&store);
        Self {
            allowed: AtomicBool::new(record.consent),
            store,
        }
    }

    /// Update and persist the user's consent decision.
    pub fn set_consent(&self, consent: bool, version: &str) {
        self.allowed.store(consent, Ordering::Release);
        config::save_consent(
            &self.store,
            &ConsentRecord {
                consent,
                version: version.to_string(),
            },
        );
        debug!("Analytics consent set to {}", consent);
    }
}

impl ConsentGate for StoredConsentGate {
    fn allowed(&self) -> bool {
        self.allowed.load(Ordering::Acquire)
    }
}

/// Delivers events somewhere.
pub trait AnalyticsSink: Send + Sync {
    fn submit(
        &self,
        event: AnalyticsEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), VoiceError>> + Send + 'static>>;
}

/// Sink that POSTs events to the storefront analytics endpoint.
pub struct HttpAnalyticsSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnalyticsSink {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: format!("{}/api/analytics/event", base_url.trim_end_matches('/')),
        }
    }
}

impl AnalyticsSink for HttpAnalyticsSink {
    fn submit(
        &self,
        event: AnalyticsEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), VoiceError>> + Send + 'static>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let response = client
                .post(&endpoint)
                .json(&event)
                .send()
                .await
                .map_err(|e| VoiceError::Transport(format!("analytics request failed: {}", e)))?;
            if !response.status().is_success() {
                return Err(VoiceError::Transport(format!(
                    "analytics request returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}

/// Records events for one session, tagged with the session and user ids.
pub struct AnalyticsReporter {
    gate: Arc<dyn ConsentGate>,
    sink: Arc<dyn AnalyticsSink>,
    session_id: String,
    user_id: String,
}

impl AnalyticsReporter {
    pub fn new(gate: Arc<dyn ConsentGate>, sink: Arc<dyn AnalyticsSink>, user_id: String) -> Self {
        Self {
            gate,
            sink,
            session_id: format!("session_{}", Uuid::new_v4().simple()),
            user_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record an event. Returns immediately; delivery happens on a spawned
    /// task. Without consent this is a no-op and builds nothing.
    pub fn record(&self, event_type: &str, payload: Value) {
        if !self.gate.allowed() {
            return;
        }
        let event = AnalyticsEvent {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            timestamp: Utc::now(),
            payload,
        };
        let future = self.sink.submit(event);
        tokio::spawn(async move {
            if let Err(e) = future.await {
                debug!("Analytics submission dropped: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct StaticGate(bool);

    impl ConsentGate for StaticGate {
        fn allowed(&self) -> bool {
            self.0
        }
    }

    struct CountingSink {
        submitted: Arc<AtomicUsize>,
    }

    impl AnalyticsSink for CountingSink {
        fn submit(
            &self,
            _event: AnalyticsEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), VoiceError>> + Send + 'static>> {
            let submitted = Arc::clone(&self.submitted);
            Box::pin(async move {
                submitted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn reporter(allowed: bool) -> (AnalyticsReporter, Arc<AtomicUsize>) {
        let submitted = Arc::new(AtomicUsize::new(0));
        let reporter = AnalyticsReporter::new(
            Arc::new(StaticGate(allowed)),
            Arc::new(CountingSink {
                submitted: Arc::clone(&submitted),
            }),
            "user_test".into(),
        );
        (reporter, submitted)
    }

    #[tokio::test]
    async fn events_flow_with_consent() {
        let (reporter, submitted) = reporter(true);
        reporter.record("voice_command", serde_json::json!({ "text": "checkout" }));
        tokio::task::yield_now().await;
        assert_eq!(submitted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nothing_leaves_without_consent() {
        let (reporter, submitted) = reporter(false);
        reporter.record("voice_command", serde_json::json!({ "text": "checkout" }));
        reporter.record("speaking_started", Value::Null);
        tokio::task::yield_now().await;
        assert_eq!(submitted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn consent_gate_persists_decision() {
        let dir = std::env::temp_dir().join(format!("pravis-voice-test-{}", Uuid::new_v4()));
        let store = Arc::new(PreferenceStore::open(dir.join("voice_settings.json")));
        let gate = StoredConsentGate::new(Arc::clone(&store));
        assert!(!gate.allowed());

        gate.set_consent(true, "1.0");
        assert!(gate.allowed());
        let record = config::load_consent(&store);
        assert!(record.consent);
        assert_eq!(record.version, "1.0");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = AnalyticsEvent {
            id: "e1".into(),
            event_type: "voice_command".into(),
            session_id: "session_abc".into(),
            user_id: "user_abc".into(),
            timestamp: Utc::now(),
            payload: Value::Null,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("eventType").is_some());
        assert!(value.get("sessionId").is_some());
        assert!(value.get("userId").is_some());
    }
}
