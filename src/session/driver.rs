//! Serialized executor for session-driving commands.
//!
//! Listening, command processing, and speaking are one voice turn at a
//! time: each operation must observe the one the shell issued before it. A
//! single worker task consumes jobs from a queue and awaits each to
//! completion, so a queued stop always sees the start that preceded it and
//! releases the hardware it acquired. Synchronous controls (stop-speaking,
//! setters) bypass the queue and land mid-operation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::VoiceSession;
use crate::dispatch::CommandResponse;
use crate::output::SpeakOptions;

/// A session operation to run in order.
#[derive(Debug, Clone)]
pub enum SessionJob {
    StartListening,
    StopListening,
    ProcessCommand { text: String },
    Speak { text: String, voice: Option<String> },
}

/// Owns the worker task that runs jobs one at a time.
pub struct SessionDriver {
    tx: mpsc::UnboundedSender<SessionJob>,
}

impl SessionDriver {
    /// Spawn the worker. `on_response` receives the outcome of each
    /// processed command; errors surface through the session's hooks.
    pub fn spawn(
        session: Arc<VoiceSession>,
        on_response: impl Fn(CommandResponse) + Send + 'static,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    SessionJob::StartListening => {
                        let _ = session.start_listening().await;
                    }
                    SessionJob::StopListening => {
                        let _ = session.stop_listening().await;
                    }
                    SessionJob::ProcessCommand { text } => {
                        if let Some(response) = session.process_command(&text).await {
                            on_response(response);
                        }
                    }
                    SessionJob::Speak { text, voice } => {
                        let options = SpeakOptions {
                            voice,
                            ..SpeakOptions::default()
                        };
                        session.speak(&text, options).await;
                    }
                }
            }
            debug!("Session driver exiting");
        });
        Self { tx }
    }

    /// Queue a job behind everything already enqueued.
    pub fn enqueue(&self, job: SessionJob) {
        if self.tx.send(job).is_err() {
            debug!("Session driver gone, dropping job");
        }
    }
}
