//! Adapter for the explicit-handshake realtime protocol.
//!
//! Sequence: open the socket with a bearer credential, send the
//! session-configuration message, and confirm the session only once the
//! provider acknowledges with `session.updated`. The receive loop
//! demultiplexes inbound events into session state; `finish` commits the
//! audio buffer and awaits the final transcript signal.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use murmur_foundation::TranscriptionError;
use murmur_stt::adapter::{CONNECT_TIMEOUT, FINAL_TRANSCRIPT_TIMEOUT};
use murmur_stt::{
    ProviderConfig, Session, StreamingAdapter, TranscriptionChunk, WsStream, WsTransport,
};

use crate::messages::{self, ServerEvent};

const DEFAULT_URL: &str = "wss://api.openai.com/v1/realtime?intent=transcription";

const SUPPORTED_MODELS: [&str; 3] = ["gpt-4o-transcribe", "gpt-4o-mini-transcribe", "whisper-1"];

/// Explicit-handshake realtime transcription adapter.
pub struct OpenAiRealtimeAdapter {
    base_url: String,
}

impl Default for OpenAiRealtimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiRealtimeAdapter {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
        }
    }

    /// Override the endpoint (tests run against a local mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn connect(
        &self,
        config: &ProviderConfig,
    ) -> Result<(murmur_stt::WsSink, WsStream), TranscriptionError> {
        let mut request = self
            .base_url
            .as_str()
            .into_client_request()
            .map_err(|e| TranscriptionError::Config(format!("invalid endpoint url: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| TranscriptionError::InvalidCredential)?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TranscriptionError::Network("connection timeout".into()))?
            .map_err(|e| TranscriptionError::Network(e.to_string()))?;
        Ok(ws.split())
    }
}

#[async_trait]
impl StreamingAdapter for OpenAiRealtimeAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn validate_config(&self, config: &ProviderConfig) -> Result<(), TranscriptionError> {
        if config.api_key.trim().is_empty() {
            return Err(TranscriptionError::InvalidCredential);
        }
        if !SUPPORTED_MODELS.contains(&config.model.as_str()) {
            return Err(TranscriptionError::InvalidModel(config.model.clone()));
        }
        Ok(())
    }

    async fn start_session(&self, config: &ProviderConfig) -> Result<Session, TranscriptionError> {
        self.validate_config(config)?;

        let (sink, stream) = self.connect(config).await?;
        let session = Session::new();
        session.set_transport(Box::new(WsTransport::new(sink))).await;

        // Handshake: configuration out, confirmation arrives via the
        // receive loop on session.updated.
        session.send_text(&messages::session_update(config)).await?;

        info!(target: "stt", session_id = session.id(), model = %config.model, "Realtime session opened, awaiting acknowledgment");
        tokio::spawn(receive_loop(stream, session.clone()));
        Ok(session)
    }

    async fn push_audio(
        &self,
        session: &Session,
        audio: &[u8],
    ) -> Result<(), TranscriptionError> {
        if !session.is_active() {
            return Err(TranscriptionError::Session("session is not active".into()));
        }
        let encoded = BASE64.encode(audio);
        session.send_text(&messages::audio_append(&encoded)).await
    }

    async fn finish(&self, session: &Session) -> Result<String, TranscriptionError> {
        session.send_text(&messages::buffer_commit()).await?;

        // One-way completion signal: the receive loop stores the completed
        // transcript, observed here through the watch channel.
        let mut transcript_rx = session.subscribe_transcript();
        let deadline = Instant::now() + FINAL_TRANSCRIPT_TIMEOUT;
        let transcript = loop {
            let current = transcript_rx.borrow_and_update().clone();
            if !current.is_empty() {
                break current;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::ZERO {
                session.cleanup().await;
                return Err(TranscriptionError::Session(
                    "timed out waiting for final transcript".into(),
                ));
            }
            match tokio::time::timeout(remaining, transcript_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    session.cleanup().await;
                    return Err(TranscriptionError::Session(
                        "session closed before final transcript".into(),
                    ));
                }
                Err(_) => {
                    session.cleanup().await;
                    return Err(TranscriptionError::Session(
                        "timed out waiting for final transcript".into(),
                    ));
                }
            }
        };

        session.cleanup().await;
        Ok(transcript)
    }
}

/// Demultiplex inbound provider events into session state.
async fn receive_loop(mut stream: WsStream, session: Session) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_event(&session, &text).await,
            Ok(Message::Close(_)) => {
                debug!(target: "stt", session_id = session.id(), "Server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let error = TranscriptionError::Network(e.to_string());
                warn!(target: "stt", session_id = session.id(), "Receive loop failed: {}", error);
                session.fail_confirmation(error.clone());
                session.finish_partials_with_error(error).await;
                session.set_inactive();
                return;
            }
        }
    }
    session.finish_partials();
}

async fn handle_event(session: &Session, raw: &str) {
    let event: ServerEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(target: "stt", "Ignoring unparseable server event: {}", e);
            return;
        }
    };

    match event {
        ServerEvent::SessionCreated => {
            debug!(target: "stt", session_id = session.id(), "Session created");
        }
        ServerEvent::SessionUpdated => {
            session.confirm();
        }
        ServerEvent::BufferCommitted => {
            debug!(target: "stt", session_id = session.id(), "Audio buffer committed");
        }
        ServerEvent::TranscriptionDelta { delta } => {
            session.yield_partial(TranscriptionChunk::partial(delta)).await;
        }
        ServerEvent::TranscriptionCompleted { transcript } => {
            session.set_final_transcript(&transcript);
            session
                .yield_partial(TranscriptionChunk::final_text(transcript))
                .await;
        }
        ServerEvent::Error { error } => {
            warn!(target: "stt", session_id = session.id(), "Provider error: {}", error.message);
            let err = TranscriptionError::Session(error.message);
            if !session.is_confirmed() {
                session.fail_confirmation(err);
            } else {
                session.finish_partials_with_error(err).await;
            }
            session.set_inactive();
        }
        ServerEvent::Unrecognized => {
            debug!(target: "stt", session_id = session.id(), "Ignoring unrecognized server event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_credential() {
        let adapter = OpenAiRealtimeAdapter::new();
        let config = ProviderConfig::new("", "gpt-4o-transcribe");
        assert_eq!(
            adapter.validate_config(&config),
            Err(TranscriptionError::InvalidCredential)
        );
    }

    #[test]
    fn validate_rejects_unsupported_model() {
        let adapter = OpenAiRealtimeAdapter::new();
        let config = ProviderConfig::new("sk-test", "nova-3");
        assert!(matches!(
            adapter.validate_config(&config),
            Err(TranscriptionError::InvalidModel(_))
        ));
    }

    #[test]
    fn validate_accepts_supported_models() {
        let adapter = OpenAiRealtimeAdapter::new();
        for model in SUPPORTED_MODELS {
            let config = ProviderConfig::new("sk-test", model);
            assert!(adapter.validate_config(&config).is_ok());
        }
    }
}
