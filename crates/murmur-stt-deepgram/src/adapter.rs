//! Adapter for the implicit-readiness streaming protocol.
//!
//! The provider accepts audio the moment the socket opens, so
//! `start_session` confirms the session synchronously before the receive
//! loop starts. The receive loop classifies failures and reconnects with a
//! bounded budget, replacing the transport on the existing session so the
//! session identifier never changes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;

use murmur_foundation::{is_transient_connection_error, ConnectionState, ConnectionStateHub, TranscriptionError};
use murmur_stt::adapter::{CONNECT_TIMEOUT, FINAL_TRANSCRIPT_TIMEOUT};
use murmur_stt::{
    ProviderConfig, Session, StreamingAdapter, TranscriptionChunk, WsSink, WsStream, WsTransport,
};

use crate::messages::{self, StreamEvent};
use crate::reconnect::ReconnectPolicy;

const DEFAULT_URL: &str = "wss://api.deepgram.com/v1/listen";

/// How long the final transcript must stay unchanged before `finish`
/// considers it stable (5 consecutive 100 ms windows).
const STABILITY_WINDOW: Duration = Duration::from_millis(500);

/// Implicit-readiness streaming adapter with built-in reconnect.
pub struct DeepgramAdapter {
    base_url: String,
    policy: ReconnectPolicy,
    state_hub: Option<ConnectionStateHub>,
}

impl Default for DeepgramAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeepgramAdapter {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            policy: ReconnectPolicy::default(),
            state_hub: None,
        }
    }

    /// Override the endpoint (tests run against a local mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Publish connection state transitions (informational only).
    pub fn with_state_hub(mut self, hub: ConnectionStateHub) -> Self {
        self.state_hub = Some(hub);
        self
    }

    /// Connection parameters travel as query parameters, not in the JSON
    /// payload. Keyword boosts are skipped for model variants that ignore
    /// them.
    fn build_url(&self, config: &ProviderConfig) -> Result<String, TranscriptionError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| TranscriptionError::Config(format!("invalid endpoint url: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("model", &config.model)
                .append_pair("language", config.language.as_deref().unwrap_or("multi"))
                .append_pair("sample_rate", "24000")
                .append_pair("channels", "1")
                .append_pair("encoding", "linear16")
                .append_pair("punctuate", "true")
                .append_pair("smart_format", "true")
                .append_pair("endpointing", "300");
            if !config.model.starts_with("nova-3") {
                for keyword in &config.keywords {
                    query.append_pair("keywords", keyword);
                }
            }
        }
        Ok(url.into())
    }
}

/// Everything the receive loop needs to re-open a dropped connection.
struct ConnectParams {
    url: String,
    api_key: String,
}

impl ConnectParams {
    /// The credential rides in a custom header; the provider does not honor
    /// sub-protocol negotiation for auth.
    async fn open(&self) -> Result<(WsSink, WsStream), TranscriptionError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TranscriptionError::Config(format!("invalid endpoint url: {}", e)))?;
        let token = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|_| TranscriptionError::InvalidCredential)?;
        request.headers_mut().insert("Authorization", token);

        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TranscriptionError::Network("connection timeout".into()))?
            .map_err(|e| TranscriptionError::Network(e.to_string()))?;
        Ok(ws.split())
    }
}

#[async_trait]
impl StreamingAdapter for DeepgramAdapter {
    fn provider_name(&self) -> &'static str {
        "deepgram"
    }

    fn validate_config(&self, config: &ProviderConfig) -> Result<(), TranscriptionError> {
        if config.api_key.trim().is_empty() {
            return Err(TranscriptionError::InvalidCredential);
        }
        if config.model.trim().is_empty() {
            return Err(TranscriptionError::InvalidModel("(empty)".into()));
        }
        Ok(())
    }

    async fn start_session(&self, config: &ProviderConfig) -> Result<Session, TranscriptionError> {
        self.validate_config(config)?;

        let params = ConnectParams {
            url: self.build_url(config)?,
            api_key: config.api_key.clone(),
        };
        let (sink, stream) = params.open().await?;

        let session = Session::new();
        session.set_transport(Box::new(WsTransport::new(sink))).await;

        // The provider accepts audio immediately after connecting: confirm
        // before the receive loop starts so readiness can never race it.
        session.confirm();
        if let Some(hub) = &self.state_hub {
            hub.publish(ConnectionState::Connected);
        }

        info!(target: "stt", session_id = session.id(), model = %config.model, "Streaming session opened");
        tokio::spawn(run_listener(
            stream,
            session.clone(),
            params,
            self.policy.clone(),
            self.state_hub.clone(),
        ));
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
        if session.is_reconnecting() {
            // Fail fast: callers hold delivery until the window closes
            // rather than writing into a half-open socket.
            return Err(TranscriptionError::Session(
                "session is reconnecting".into(),
            ));
        }
        session.send_binary(audio).await
    }

    async fn finish(&self, session: &Session) -> Result<String, TranscriptionError> {
        session.send_text(&messages::close_stream()).await?;

        // Multiple final segments may still be in flight; the transcript is
        // considered stable once it stops changing for a full window.
        let mut transcript_rx = session.subscribe_transcript();
        let deadline = Instant::now() + FINAL_TRANSCRIPT_TIMEOUT;
        loop {
            transcript_rx.borrow_and_update();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::ZERO {
                break;
            }
            match tokio::time::timeout(STABILITY_WINDOW.min(remaining), transcript_rx.changed())
                .await
            {
                // Transcript changed: the debounce restarts.
                Ok(Ok(())) => continue,
                // Watch closed or a full quiet window elapsed.
                Ok(Err(_)) | Err(_) => break,
            }
        }

        let transcript = session.final_transcript();
        session.cleanup().await;
        Ok(transcript)
    }
}

enum Ending {
    /// Server closed the stream cleanly.
    Closed,
    /// Receive failure with the transport's error text.
    Failed(String),
}

struct ListenOutcome {
    received_any: bool,
    ending: Ending,
}

/// Receive loop with a bounded reconnect budget.
///
/// The attempt counter resets once a connection proves healthy (delivers at
/// least one frame); consecutive failures without progress consume the
/// budget, and exhausting it terminates the session.
async fn run_listener(
    mut stream: WsStream,
    session: Session,
    params: ConnectParams,
    policy: ReconnectPolicy,
    state_hub: Option<ConnectionStateHub>,
) {
    let mut attempts: u32 = 0;
    loop {
        let outcome = listen_once(&mut stream, &session).await;
        if outcome.received_any {
            attempts = 0;
        }

        let detail = match outcome.ending {
            Ending::Closed => {
                debug!(target: "stt", session_id = session.id(), "Server closed the stream");
                session.finish_partials();
                return;
            }
            Ending::Failed(detail) => detail,
        };

        if !session.is_active() || !is_transient_connection_error(&detail) {
            terminate(&session, &state_hub, TranscriptionError::Network(detail)).await;
            return;
        }

        session.set_reconnecting(true);
        let reopened = loop {
            attempts += 1;
            if attempts > policy.max_attempts {
                break None;
            }
            if let Some(hub) = &state_hub {
                hub.publish(ConnectionState::Reconnecting {
                    attempt: attempts,
                    max: policy.max_attempts,
                });
            }
            let delay = policy.delay_for(attempts);
            warn!(
                target: "stt",
                session_id = session.id(),
                "Transient connection failure ({}), reconnect attempt {}/{} in {:?}",
                detail, attempts, policy.max_attempts, delay
            );
            tokio::time::sleep(delay).await;

            match params.open().await {
                Ok((sink, new_stream)) => {
                    // Replace the transport on the existing session; the
                    // session identifier is unchanged.
                    session.set_transport(Box::new(WsTransport::new(sink))).await;
                    break Some(new_stream);
                }
                Err(e) => {
                    warn!(target: "stt", session_id = session.id(), "Reconnect attempt failed: {}", e);
                }
            }
        };
        session.set_reconnecting(false);

        match reopened {
            Some(new_stream) => {
                info!(target: "stt", session_id = session.id(), "Reconnected, resuming receive loop");
                if let Some(hub) = &state_hub {
                    hub.publish(ConnectionState::Connected);
                }
                stream = new_stream;
            }
            None => {
                terminate(
                    &session,
                    &state_hub,
                    TranscriptionError::Network(format!(
                        "reconnect attempts exhausted after: {}",
                        detail
                    )),
                )
                .await;
                return;
            }
        }
    }
}

/// Read one connection until it closes or fails.
async fn listen_once(stream: &mut WsStream, session: &Session) -> ListenOutcome {
    let mut received_any = false;
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                received_any = true;
                if let Some(error) = handle_event(session, &text).await {
                    return ListenOutcome {
                        received_any,
                        ending: Ending::Failed(error),
                    };
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return ListenOutcome {
                    received_any,
                    ending: Ending::Closed,
                }
            }
            Some(Ok(_)) => {
                received_any = true;
            }
            Some(Err(e)) => {
                return ListenOutcome {
                    received_any,
                    ending: Ending::Failed(e.to_string()),
                }
            }
        }
    }
}

/// Dispatch one inbound event. Provider `Error` frames terminate the
/// session in place and return the detail so the receive loop exits; a
/// terminated session is never reconnected.
async fn handle_event(session: &Session, raw: &str) -> Option<String> {
    let event: StreamEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(target: "stt", "Ignoring unparseable stream event: {}", e);
            return None;
        }
    };

    match &event {
        StreamEvent::Metadata { request_id } => {
            debug!(target: "stt", session_id = session.id(), ?request_id, "Metadata received");
            session.confirm();
            None
        }
        StreamEvent::Results { is_final, .. } => {
            if let Some(text) = event.transcript() {
                if *is_final {
                    // Multiple final segments can arrive per session.
                    session.append_final_segment(text);
                    session
                        .yield_partial(TranscriptionChunk::final_text(text))
                        .await;
                } else {
                    session.yield_partial(TranscriptionChunk::partial(text)).await;
                }
            }
            None
        }
        StreamEvent::Error {
            description,
            message,
        } => {
            let detail = description
                .as_deref()
                .or(message.as_deref())
                .unwrap_or("provider error")
                .to_string();
            warn!(target: "stt", session_id = session.id(), "Provider error: {}", detail);
            let err = TranscriptionError::Session(detail.clone());
            if !session.is_confirmed() {
                session.fail_confirmation(err);
            } else {
                session.finish_partials_with_error(err).await;
            }
            session.set_inactive();
            Some(detail)
        }
        StreamEvent::Unknown => None,
    }
}

async fn terminate(
    session: &Session,
    state_hub: &Option<ConnectionStateHub>,
    error: TranscriptionError,
) {
    warn!(target: "stt", session_id = session.id(), "Session terminated: {}", error);
    if let Some(hub) = state_hub {
        hub.publish(ConnectionState::Error(error.to_string()));
    }
    session.fail_confirmation(error.clone());
    session.finish_partials_with_error(error).await;
    session.set_inactive();
}
