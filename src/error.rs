//! Error taxonomy for the voice session.
//!
//! Input-side failures (missing feature, denied microphone, failed
//! transcription upload) put the session into the Error state until the
//! next successful start. On the speaking side only an unrecoverable
//! capability failure is fatal; transport and playback failures degrade
//! gracefully and return the session to Idle.

/// Errors surfaced through the session's error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// The user or platform refused microphone access.
    PermissionDenied(String),
    /// The capability is absent in the host environment (no capture device,
    /// no local synthesis engine).
    UnsupportedFeature(String),
    /// Network or backend failure (non-2xx response, connection error).
    Transport(String),
    /// Speech synthesis produced no usable audio.
    Synthesis(String),
    /// Audio playback failed after synthesis succeeded.
    Playback(String),
    /// Empty or otherwise unusable input.
    InvalidInput(String),
}

impl VoiceError {
    /// Whether this failure marks a broken capability rather than a
    /// transient condition. Used on the speaking side to decide between
    /// the Error state and a graceful return to Idle.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::UnsupportedFeature(_)
        )
    }
}

impl std::fmt::Display for VoiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied(msg) => write!(f, "microphone permission denied: {}", msg),
            Self::UnsupportedFeature(msg) => write!(f, "unsupported feature: {}", msg),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
            Self::Synthesis(msg) => write!(f, "synthesis error: {}", msg),
            Self::Playback(msg) => write!(f, "playback error: {}", msg),
            Self::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for VoiceError {}
