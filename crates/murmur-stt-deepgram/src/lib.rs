//! Deepgram streaming transcription adapter for Murmur.
//!
//! Implements the implicit-readiness wire protocol: connection parameters
//! travel as URL query parameters, outbound binary frames are raw PCM16
//! audio, inbound JSON frames carry `Metadata`/`Results`/`Error` events, and
//! end-of-audio is the `{"type": "CloseStream"}` control frame. The provider
//! accepts audio immediately after connecting, so sessions are confirmed
//! synchronously; the receive loop carries a bounded reconnect budget for
//! transient connection failures.

pub mod adapter;
pub mod messages;
pub mod reconnect;

pub use adapter::DeepgramAdapter;
pub use reconnect::ReconnectPolicy;

pub use murmur_stt::{ProviderConfig, Session, StreamingAdapter, TranscriptionChunk};
