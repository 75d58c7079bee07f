//! HTTP command transport against the storefront backend.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use super::{Command, CommandResponse, CommandTransport};
use crate::error::VoiceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Transport that POSTs commands to `/api/v1/voice/process-command`.
pub struct HttpCommandTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCommandTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: format!(
                "{}/api/v1/voice/process-command",
                base_url.trim_end_matches('/')
            ),
        }
    }
}

impl CommandTransport for HttpCommandTransport {
    fn send(
        &self,
        command: &Command,
    ) -> Pin<Box<dyn Future<Output = Result<CommandResponse, VoiceError>> + Send + '_>> {
        let body = json!({
            "text": command.text,
            "context": command.context,
        });
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| VoiceError::Transport(format!("command request failed: {}", e)))?;

            if !response.status().is_success() {
                return Err(VoiceError::Transport(format!(
                    "command request returned {}",
                    response.status()
                )));
            }
            let value: serde_json::Value = response
                .json()
                .await
                .map_err(|e| VoiceError::Transport(format!("unparsable command response: {}", e)))?;
            debug!("Command response: {}", value);
            CommandResponse::from_value(&value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_built_from_base_url() {
        let transport = HttpCommandTransport::new("http://localhost:8000/");
        assert_eq!(
            transport.endpoint,
            "http://localhost:8000/api/v1/voice/process-command"
        );
    }
}
