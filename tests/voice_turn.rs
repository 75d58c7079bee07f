//! End-to-end voice turn over the public API: a host-fed recognizer, a
//! scripted backend, and a recording storefront. Covers the path from
//! "start listening" through spoken response and routed action.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use pravis_voice::analytics::{AnalyticsEvent, AnalyticsReporter, AnalyticsSink, ConsentGate};
use pravis_voice::config::VoicePreference;
use pravis_voice::dispatch::{
    Action, CartItem, CartPort, Command, CommandDispatcher, CommandResponse, CommandTransport,
    RouterPort,
};
use pravis_voice::input::OnDeviceRecognizer;
use pravis_voice::output::{PlaybackOutcome, SpeakOptions, SpeechOutput};
use pravis_voice::session::{SessionState, VoiceSession};
use pravis_voice::VoiceError;

struct SilentOutput {
    spoken: Mutex<Vec<String>>,
}

// Newtype around `Arc<SilentOutput>` because the orphan rule forbids
// implementing the crate's `SpeechOutput` for `Arc<_>` here.
struct SharedOutput(Arc<SilentOutput>);

impl SpeechOutput for SharedOutput {
    fn speak(
        &self,
        text: &str,
        _options: &SpeakOptions,
    ) -> Pin<Box<dyn Future<Output = Result<PlaybackOutcome, VoiceError>> + Send + '_>> {
        self.0.spoken.lock().unwrap().push(text.to_string());
        Box::pin(async { Ok(PlaybackOutcome::Completed) })
    }

    fn stop(&self) {}

    fn name(&self) -> String {
        "silent output".into()
    }
}

struct ScriptedBackend;

impl CommandTransport for ScriptedBackend {
    fn send(
        &self,
        command: &Command,
    ) -> Pin<Box<dyn Future<Output = Result<CommandResponse, VoiceError>> + Send + '_>> {
        let response = match command.text.as_str() {
            "show me silk sarees" => CommandResponse {
                text: "Here are our silk sarees".into(),
                action: Some(Action::Search {
                    query: "silk sarees".into(),
                }),
                error: false,
            },
            _ => CommandResponse {
                text: "I didn't catch that".into(),
                action: None,
                error: false,
            },
        };
        Box::pin(async move { Ok(response) })
    }
}

struct RecordingRouter {
    paths: Mutex<Vec<String>>,
}

impl RouterPort for RecordingRouter {
    fn navigate(&self, path: &str) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}

struct SilentCart;

impl CartPort for SilentCart {
    fn add_item(&self, _item: CartItem) {}
}

struct NoConsent;

impl ConsentGate for NoConsent {
    fn allowed(&self) -> bool {
        false
    }
}

struct NullSink;

impl AnalyticsSink for NullSink {
    fn submit(
        &self,
        _event: AnalyticsEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), VoiceError>> + Send + 'static>> {
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn voice_turn_from_hypothesis_to_storefront_action() {
    let (recognizer, handle) = OnDeviceRecognizer::new();
    let output = Arc::new(SilentOutput {
        spoken: Mutex::new(Vec::new()),
    });
    let router = Arc::new(RecordingRouter {
        paths: Mutex::new(Vec::new()),
    });
    let dispatcher = CommandDispatcher::new(
        Box::new(ScriptedBackend),
        Arc::clone(&router) as Arc<dyn RouterPort>,
        Arc::new(SilentCart),
    );
    let analytics = AnalyticsReporter::new(Arc::new(NoConsent), Arc::new(NullSink), "user_t".into());
    let session = VoiceSession::new(
        Box::new(recognizer),
        Box::new(SharedOutput(Arc::clone(&output))),
        dispatcher,
        analytics,
        VoicePreference::default(),
        None,
    );

    let transcripts: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&transcripts);
    session.on_transcript_change(move |text| seen.lock().unwrap().push(text.to_string()));

    // Listening turn with two interim hypotheses.
    session.start_listening().await.unwrap();
    assert_eq!(session.state(), SessionState::Listening);
    handle.push_hypothesis("show me silk");
    handle.push_hypothesis("show me silk sarees");
    let text = session.stop_listening().await.unwrap();
    assert_eq!(text, "show me silk sarees");
    assert_eq!(session.state(), SessionState::Idle);

    // The finished transcript becomes a spoken response and a navigation.
    let response = session.process_command(&text).await.unwrap();
    assert_eq!(response.text, "Here are our silk sarees");
    assert_eq!(
        *output.spoken.lock().unwrap(),
        vec!["Here are our silk sarees".to_string()]
    );
    assert_eq!(
        *router.paths.lock().unwrap(),
        vec!["/search?q=silk+sarees".to_string()]
    );
    assert_eq!(session.state(), SessionState::Idle);

    // Interim hypotheses replaced one another rather than accumulating.
    assert_eq!(
        *transcripts.lock().unwrap(),
        vec!["", "show me silk", "show me silk sarees", "show me silk sarees"]
    );
}
