//! Provider adapter interface.
//!
//! One implementation per provider wire protocol. Adapters own the
//! connection lifecycle and the receive loop; everything above them works
//! with [`Session`] handles and [`TranscriptionChunk`]s only.

use async_trait::async_trait;
use std::time::Duration;

use murmur_foundation::TranscriptionError;

use crate::session::Session;
use crate::types::ProviderConfig;

/// Connection establishment budget shared by all adapters.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `finish` waits for a stable final transcript.
pub const FINAL_TRANSCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streaming transcription provider.
#[async_trait]
pub trait StreamingAdapter: Send + Sync {
    /// Provider identifier for logs and the completion callback.
    fn provider_name(&self) -> &'static str;

    /// Fail fast on missing credential or unsupported model. No I/O.
    fn validate_config(&self, config: &ProviderConfig) -> Result<(), TranscriptionError>;

    /// Open a connection and perform the provider handshake.
    ///
    /// Must not block on audio. Readiness is signaled asynchronously through
    /// the returned session's readiness future; callers await
    /// [`Session::wait_ready`] before delivering audio.
    async fn start_session(&self, config: &ProviderConfig) -> Result<Session, TranscriptionError>;

    /// Send one audio buffer over the open connection.
    ///
    /// Fails with a session error if the session is inactive or
    /// mid-reconnect; callers must not retry delivery during that window.
    async fn push_audio(
        &self,
        session: &Session,
        audio: &[u8],
    ) -> Result<(), TranscriptionError>;

    /// Signal end-of-audio, wait (cooperatively, bounded by
    /// [`FINAL_TRANSCRIPT_TIMEOUT`]) for a stable final transcript, then tear
    /// the session down.
    async fn finish(&self, session: &Session) -> Result<String, TranscriptionError>;
}
