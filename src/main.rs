//! Pravis Boutique voice session binary.
//!
//! Communicates with the storefront shell via JSON-line IPC on
//! stdin/stdout. Stdout is reserved for events, so logs go to stderr and a
//! rolling file in the platform data directory.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pravis_voice::analytics::{
    AnalyticsReporter, ConsentGate, HttpAnalyticsSink, StoredConsentGate,
};
use pravis_voice::config::{self, PreferenceStore, VoicePreference};
use pravis_voice::dispatch::{
    CartItem, CartPort, CommandDispatcher, HttpCommandTransport, RouterPort,
};
use pravis_voice::input::{create_speech_input, RecognizerHandle};
use pravis_voice::ipc::bridge::{emit_event, spawn_stdin_reader};
use pravis_voice::ipc::{HostCommand, SessionEvent};
use pravis_voice::output::create_speech_output;
use pravis_voice::session::{SessionDriver, SessionJob, VoiceSession};

const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Router port that forwards navigation to the shell as events.
struct IpcRouter;

impl RouterPort for IpcRouter {
    fn navigate(&self, path: &str) {
        emit_event(&SessionEvent::Navigate {
            path: path.to_string(),
        });
    }
}

/// Cart port that forwards additions to the shell as events.
struct IpcCart;

impl CartPort for IpcCart {
    fn add_item(&self, item: CartItem) {
        emit_event(&SessionEvent::CartAdd { item });
    }
}

#[tokio::main]
async fn main() {
    let _log_guard = init_tracing();

    // Emit starting event immediately so the shell knows we're alive.
    emit_event(&SessionEvent::Starting {});

    let store = Arc::new(PreferenceStore::open_default());
    let preference = VoicePreference::load(&store);
    let user_id = config::user_id(&store);
    let consent = Arc::new(StoredConsentGate::new(Arc::clone(&store)));
    let base_url =
        std::env::var("PRAVIS_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
    info!(?preference, base_url, "Configuration loaded");

    // Spawn stdin reader (blocking thread -> async channel)
    let mut cmd_rx = spawn_stdin_reader();

    let (input, recognizer) = create_speech_input(&preference, &base_url);
    // The binary carries no local synthesis engine; on-device preference
    // falls back to backend synthesis inside the factory.
    let output = create_speech_output(&preference, &base_url, None);
    let dispatcher = CommandDispatcher::new(
        Box::new(HttpCommandTransport::new(&base_url)),
        Arc::new(IpcRouter),
        Arc::new(IpcCart),
    );
    let analytics = AnalyticsReporter::new(
        Arc::clone(&consent) as Arc<dyn ConsentGate>,
        Arc::new(HttpAnalyticsSink::new(&base_url)),
        user_id,
    );
    let session = Arc::new(VoiceSession::new(
        input,
        output,
        dispatcher,
        analytics,
        preference,
        Some(Arc::clone(&store)),
    ));

    session.on_transcript_change(|text| {
        emit_event(&SessionEvent::TranscriptChange {
            text: text.to_string(),
        });
    });
    session.on_listening_change(|active| {
        emit_event(&SessionEvent::ListeningChange { active });
    });
    session.on_speaking_change(|active| {
        emit_event(&SessionEvent::SpeakingChange { active });
    });
    session.on_error(|error| {
        emit_event(&SessionEvent::Error {
            message: error.to_string(),
        });
    });

    // Session-driving commands run one at a time on the driver's worker,
    // in the order the shell sent them.
    let driver = SessionDriver::spawn(Arc::clone(&session), |response| {
        emit_event(&SessionEvent::Response {
            text: response.text,
            error: response.error,
        });
    });

    emit_event(&SessionEvent::Ready {});
    info!(session_id = session.analytics().session_id(), "Voice session ready");

    // Main loop: process commands from the shell.
    loop {
        match cmd_rx.recv().await {
            Some(command) => {
                if !handle_command(&driver, &session, &consent, &recognizer, command) {
                    break; // Stop command received
                }
            }
            None => {
                // stdin closed — shell process gone
                info!("stdin closed, shutting down");
                break;
            }
        }
    }

    info!("Voice session shutting down");
}

/// Initialize tracing to stderr plus a rolling daily log file. The returned
/// guard must stay alive for the file writer to flush.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let appender = tracing_appender::rolling::daily(config::data_dir().join("logs"), "voice.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    guard
}

/// Handle a single command from the shell.
/// Returns `false` if the main loop should exit.
///
/// Session-driving commands are queued on the driver so they run strictly
/// in arrival order; only synchronous controls run inline, which is what
/// lets a StopSpeaking land while a Speak is still in flight.
fn handle_command(
    driver: &SessionDriver,
    session: &Arc<VoiceSession>,
    consent: &Arc<StoredConsentGate>,
    recognizer: &Option<RecognizerHandle>,
    cmd: HostCommand,
) -> bool {
    match cmd {
        HostCommand::Ping {} => {
            emit_event(&SessionEvent::Pong {});
        }

        HostCommand::Stop {} => {
            emit_event(&SessionEvent::Stopping {});
            return false;
        }

        HostCommand::StartListening {} => {
            driver.enqueue(SessionJob::StartListening);
        }

        HostCommand::StopListening {} => {
            // Errors surface through the session's error hook.
            driver.enqueue(SessionJob::StopListening);
        }

        HostCommand::ProcessCommand { text } => {
            driver.enqueue(SessionJob::ProcessCommand { text });
        }

        HostCommand::Speak { text, voice } => {
            driver.enqueue(SessionJob::Speak { text, voice });
        }

        HostCommand::StopSpeaking {} => {
            session.stop_speaking();
        }

        HostCommand::RecognizerResult { text } => match recognizer {
            Some(handle) => handle.push_hypothesis(&text),
            None => warn!("Recognition result ignored: backend transcription is active"),
        },

        HostCommand::SetRecognizerAvailable { available } => match recognizer {
            Some(handle) => handle.set_available(available),
            None => warn!("Recognizer availability ignored: backend transcription is active"),
        },

        HostCommand::SetContext { context } => {
            session.set_context(context);
        }

        HostCommand::SetPreference { use_backend, voice } => {
            if let Some(use_backend) = use_backend {
                session.set_use_backend(use_backend);
            }
            if let Some(voice) = voice {
                session.set_voice(&voice);
            }
            emit_event(&SessionEvent::PreferenceUpdated {});
        }

        HostCommand::SetConsent { consent: allowed, version } => {
            consent.set_consent(allowed, version.as_deref().unwrap_or("1.0"));
            emit_event(&SessionEvent::ConsentUpdated { consent: allowed });
        }
    }

    true
}
