//! The voice session state machine.
//!
//! A session owns one speech input source and one speech output sink,
//! chosen at construction from the persisted preference, and moves through
//! four states:
//!
//! ```text
//! Idle -> Listening -> Idle -> Speaking -> Idle
//!                \                  \
//!                 -> Error           -> Error
//! ```
//!
//! Input failures (denied microphone, missing feature, failed transcription
//! upload) park the session in Error until the next successful start.
//! Transport and playback failures on the speaking side degrade gracefully
//! and return the session to Idle; only an unsupported or denied output
//! capability is fatal. Hooks
//! notify the embedding shell of transcript, listening, speaking, and error
//! changes; each edge fires exactly once even when utterances overlap or
//! are stopped mid-flight.

pub mod driver;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::analytics::AnalyticsReporter;
use crate::config::{PreferenceStore, VoicePreference};
use crate::dispatch::{Command, CommandContext, CommandDispatcher, CommandResponse};
use crate::error::VoiceError;
use crate::input::{SpeechInput, TranscriptSink};
use crate::output::{PlaybackOutcome, SpeakOptions, SpeechOutput};

pub use driver::{SessionDriver, SessionJob};

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Listening = 1,
    Speaking = 2,
    Error = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Listening,
            2 => Self::Speaking,
            3 => Self::Error,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

type TranscriptHook = Box<dyn Fn(&str) + Send>;
type FlagHook = Box<dyn Fn(bool) + Send>;
type ErrorHook = Box<dyn Fn(&VoiceError) + Send>;

#[derive(Default)]
struct SessionHooks {
    transcript: Mutex<Option<TranscriptHook>>,
    listening: Mutex<Option<FlagHook>>,
    speaking: Mutex<Option<FlagHook>>,
    error: Mutex<Option<ErrorHook>>,
}

struct SessionShared {
    state: AtomicU8,
    /// Monotonic utterance counter; a finished utterance only transitions
    /// the state if no newer utterance superseded it.
    speak_epoch: AtomicU64,
    transcript: Mutex<String>,
    context: Mutex<CommandContext>,
    hooks: SessionHooks,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    /// Transition `from -> to` atomically; false if the state moved on.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set_transcript(&self, text: &str) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.clear();
            transcript.push_str(text);
        }
        self.fire_transcript(text);
    }

    fn fire_transcript(&self, text: &str) {
        if let Ok(hook) = self.hooks.transcript.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(text);
            }
        }
    }

    fn fire_listening(&self, active: bool) {
        if let Ok(hook) = self.hooks.listening.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(active);
            }
        }
    }

    fn fire_speaking(&self, active: bool) {
        if let Ok(hook) = self.hooks.speaking.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(active);
            }
        }
    }

    fn fire_error(&self, error: &VoiceError) {
        if let Ok(hook) = self.hooks.error.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(error);
            }
        }
    }
}

/// One voice session over a storefront shell.
pub struct VoiceSession {
    shared: Arc<SessionShared>,
    input: Box<dyn SpeechInput>,
    output: Box<dyn SpeechOutput>,
    dispatcher: CommandDispatcher,
    analytics: AnalyticsReporter,
    preference: Mutex<VoicePreference>,
    store: Option<Arc<PreferenceStore>>,
}

impl VoiceSession {
    pub fn new(
        input: Box<dyn SpeechInput>,
        output: Box<dyn SpeechOutput>,
        dispatcher: CommandDispatcher,
        analytics: AnalyticsReporter,
        preference: VoicePreference,
        store: Option<Arc<PreferenceStore>>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                state: AtomicU8::new(SessionState::Idle as u8),
                speak_epoch: AtomicU64::new(0),
                transcript: Mutex::new(String::new()),
                context: Mutex::new(CommandContext::default()),
                hooks: SessionHooks::default(),
            }),
            input,
            output,
            dispatcher,
            analytics,
            preference: Mutex::new(preference),
            store,
        }
    }

    // -- hooks --------------------------------------------------------------

    pub fn on_transcript_change(&self, hook: impl Fn(&str) + Send + 'static) {
        if let Ok(mut slot) = self.shared.hooks.transcript.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn on_listening_change(&self, hook: impl Fn(bool) + Send + 'static) {
        if let Ok(mut slot) = self.shared.hooks.listening.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn on_speaking_change(&self, hook: impl Fn(bool) + Send + 'static) {
        if let Ok(mut slot) = self.shared.hooks.speaking.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn on_error(&self, hook: impl Fn(&VoiceError) + Send + 'static) {
        if let Ok(mut slot) = self.shared.hooks.error.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn transcript(&self) -> String {
        self.shared
            .transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn preference(&self) -> VoicePreference {
        self.preference
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn analytics(&self) -> &AnalyticsReporter {
        &self.analytics
    }

    // -- listening ----------------------------------------------------------

    /// Begin a listening turn. A no-op when already listening; when
    /// speaking, the utterance is stopped first. The transcript resets to
    /// empty and then tracks interim hypotheses.
    pub async fn start_listening(&self) -> Result<(), VoiceError> {
        match self.shared.state() {
            SessionState::Listening => {
                debug!("start_listening ignored: already listening");
                return Ok(());
            }
            SessionState::Speaking => {
                debug!("start_listening while speaking, stopping speech first");
                self.stop_speaking();
            }
            _ => {}
        }

        self.shared.set_transcript("");
        let shared = Arc::clone(&self.shared);
        let sink: TranscriptSink = Arc::new(move |text| {
            shared.set_transcript(text);
        });

        match self.input.start(sink).await {
            Ok(()) => {
                self.shared.set_state(SessionState::Listening);
                self.shared.fire_listening(true);
                info!("Listening started ({})", self.input.name());
                self.analytics.record("listening_started", json!(null));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to start listening: {}", e);
                self.enter_error(&e);
                Err(e)
            }
        }
    }

    /// Finish the listening turn and return the final transcript. When not
    /// listening this returns the last transcript unchanged. For backend
    /// transcription this awaits the upload; on upload failure the session
    /// enters Error and the locally captured transcript value is kept.
    pub async fn stop_listening(&self) -> Result<String, VoiceError> {
        if self.shared.state() != SessionState::Listening {
            return Ok(self.transcript());
        }

        match self.input.stop().await {
            Ok(text) => {
                self.shared.set_transcript(&text);
                self.shared.set_state(SessionState::Idle);
                self.shared.fire_listening(false);
                info!("Listening stopped, transcript {:?}", text);
                self.analytics
                    .record("listening_stopped", json!({ "chars": text.len() }));
                Ok(text)
            }
            Err(e) => {
                warn!("Failed to stop listening: {}", e);
                self.shared.fire_listening(false);
                self.enter_error(&e);
                Err(e)
            }
        }
    }

    // -- commands -----------------------------------------------------------

    /// Process a finished transcript: dispatch it, speak the response, then
    /// apply its action. Empty text is dropped. Dispatch failures degrade to
    /// the canned fallback response instead of erroring out.
    pub async fn process_command(&self, text: &str) -> Option<CommandResponse> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Empty command dropped");
            return None;
        }

        let context = self
            .shared
            .context
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        let command = Command::new(text, context);
        let response = match self.dispatcher.process(&command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Command dispatch failed: {}", e);
                self.shared.fire_error(&e);
                self.analytics
                    .record("voice_error", json!({ "message": e.to_string() }));
                CommandResponse::fallback()
            }
        };
        self.analytics.record(
            "voice_command",
            json!({ "text": text, "response": response.text, "error": response.error }),
        );

        self.speak(&response.text, SpeakOptions::default()).await;
        if let Some(action) = &response.action {
            self.dispatcher.route_action(action);
        }
        Some(response)
    }

    // -- speaking -----------------------------------------------------------

    /// Speak `text`, returning true if an utterance was started. Listening
    /// is stopped first; a current utterance is superseded. Resolves when
    /// playback ends, is cancelled, or fails.
    pub async fn speak(&self, text: &str, mut options: SpeakOptions) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        match self.shared.state() {
            SessionState::Listening => {
                debug!("speak while listening, stopping capture first");
                let _ = self.stop_listening().await;
            }
            SessionState::Speaking => {
                debug!("speak while speaking, superseding current utterance");
                self.output.stop();
            }
            _ => {}
        }

        if options.voice.is_none() {
            options.voice = Some(self.preference().synthesis_voice);
        }

        let epoch = self.shared.speak_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.shared.set_state(SessionState::Speaking);
        if previous != SessionState::Speaking {
            self.shared.fire_speaking(true);
        }
        self.analytics
            .record("speaking_started", json!({ "chars": text.len() }));

        match self.output.speak(text, &options).await {
            Ok(outcome) => {
                self.finish_speaking(epoch);
                self.analytics.record(
                    "speaking_ended",
                    json!({ "cancelled": outcome == PlaybackOutcome::Cancelled }),
                );
                true
            }
            Err(e) if e.is_unrecoverable() => {
                warn!("Speech output unavailable: {}", e);
                if self.shared.speak_epoch.load(Ordering::SeqCst) == epoch {
                    self.shared.set_state(SessionState::Error);
                    self.shared.fire_speaking(false);
                }
                self.shared.fire_error(&e);
                self.analytics
                    .record("voice_error", json!({ "message": e.to_string() }));
                false
            }
            Err(e) => {
                warn!("Utterance failed: {}", e);
                self.finish_speaking(epoch);
                self.shared.fire_error(&e);
                self.analytics
                    .record("voice_error", json!({ "message": e.to_string() }));
                false
            }
        }
    }

    /// Interrupt the current utterance. Audio is silenced before this
    /// returns; a no-op when not speaking.
    pub fn stop_speaking(&self) {
        if self.shared.state() != SessionState::Speaking {
            return;
        }
        self.output.stop();
        if self
            .shared
            .transition(SessionState::Speaking, SessionState::Idle)
        {
            self.shared.fire_speaking(false);
        }
    }

    /// Wind down the utterance identified by `epoch`. Skipped entirely when
    /// a newer utterance superseded it; the speaking-ended edge fires at
    /// most once per utterance.
    fn finish_speaking(&self, epoch: u64) {
        if self.shared.speak_epoch.load(Ordering::SeqCst) != epoch {
            debug!("Utterance superseded, skipping state transition");
            return;
        }
        if self
            .shared
            .transition(SessionState::Speaking, SessionState::Idle)
        {
            self.shared.fire_speaking(false);
        }
    }

    // -- context and preference ---------------------------------------------

    /// Merge storefront context into the session; later commands carry it.
    pub fn set_context(&self, context: CommandContext) {
        if let Ok(mut current) = self.shared.context.lock() {
            current.merge(context);
        }
    }

    /// Flip the backend-transcription preference. Persisted immediately;
    /// takes effect at the next session construction.
    pub fn set_use_backend(&self, use_backend: bool) {
        if let Ok(mut preference) = self.preference.lock() {
            preference.use_backend_transcription = use_backend;
            self.persist_preference(&preference);
        }
        info!(
            "Backend transcription preference set to {}, applies on next session",
            use_backend
        );
    }

    /// Change the synthesis voice. Persisted immediately and used for the
    /// next utterance.
    pub fn set_voice(&self, voice: &str) {
        if let Ok(mut preference) = self.preference.lock() {
            preference.synthesis_voice = voice.to_string();
            self.persist_preference(&preference);
        }
    }

    fn persist_preference(&self, preference: &VoicePreference) {
        if let Some(store) = &self.store {
            preference.save(store);
        }
    }

    /// Park the session in Error after an input failure. Cleared by the
    /// next successful start.
    fn enter_error(&self, error: &VoiceError) {
        self.shared.set_state(SessionState::Error);
        self.shared.fire_error(error);
        self.analytics
            .record("voice_error", json!({ "message": error.to_string() }));
    }
}
