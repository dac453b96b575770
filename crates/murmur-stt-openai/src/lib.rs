//! OpenAI realtime transcription adapter for Murmur.
//!
//! Implements the explicit-handshake wire protocol: JSON control messages
//! over a persistent WebSocket, with a session-configuration message sent
//! after connect and readiness confirmed only on the provider's
//! `session.updated` acknowledgment. Audio travels base64-embedded in
//! `input_audio_buffer.append` messages.

pub mod adapter;
pub mod messages;

pub use adapter::OpenAiRealtimeAdapter;

pub use murmur_stt::{ProviderConfig, Session, StreamingAdapter, TranscriptionChunk};
