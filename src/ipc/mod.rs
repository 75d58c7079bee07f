//! IPC protocol types for communication with the storefront shell.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (session -> shell).
//! Commands use `{"command": "<name>", ...}` format (shell -> session).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::dispatch::{CartItem, CommandContext};

// ---------------------------------------------------------------------------
// Events: session -> shell (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the shell via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Starting {},
    Ready {},
    ListeningChange { active: bool },
    SpeakingChange { active: bool },
    TranscriptChange { text: String },
    Response { text: String, error: bool },
    Navigate { path: String },
    CartAdd { item: CartItem },
    PreferenceUpdated {},
    ConsentUpdated { consent: bool },
    Error { message: String },
    Pong {},
    Stopping {},
}

// ---------------------------------------------------------------------------
// Commands: shell -> session (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the shell via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum HostCommand {
    StartListening {},
    StopListening {},
    ProcessCommand {
        text: String,
    },
    Speak {
        text: String,
        #[serde(default)]
        voice: Option<String>,
    },
    StopSpeaking {},
    /// Recognition result from the shell's own recognizer (on-device mode).
    RecognizerResult {
        text: String,
    },
    SetRecognizerAvailable {
        available: bool,
    },
    SetContext {
        context: CommandContext,
    },
    SetPreference {
        #[serde(default)]
        use_backend: Option<bool>,
        #[serde(default)]
        voice: Option<String>,
    },
    SetConsent {
        consent: bool,
        #[serde(default)]
        version: Option<String>,
    },
    Ping {},
    Stop {},
}
