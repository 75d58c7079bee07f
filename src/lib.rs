//! Voice command session for the Pravis Boutique storefront.
//!
//! The crate glues four pieces together: a speech input source (on-device
//! recognition or microphone capture with backend transcription), a speech
//! output sink (local engine or backend text-to-speech), a command
//! dispatcher that interprets transcripts through the backend and drives
//! the storefront router/cart, and consent-gated analytics. The
//! [`session::VoiceSession`] state machine orchestrates them; the binary
//! exposes the whole thing over JSON-line IPC on stdin/stdout.

pub mod analytics;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod ipc;
pub mod output;
pub mod session;

pub use error::VoiceError;
pub use session::{SessionState, VoiceSession};
