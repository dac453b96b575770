//! Streaming transcription session layer for Murmur.
//!
//! This crate provides the provider-independent core of real-time
//! transcription: the [`Session`] handle shared between an adapter's receive
//! loop and the orchestrator, the [`StreamingAdapter`] trait implemented once
//! per provider wire protocol, the gate-controlled [`DeliveryQueue`] that
//! keeps audio ordered across the session-readiness boundary, and the
//! [`TranscriptStabilizer`] that turns raw partial results into text that is
//! safe to display.

use std::sync::atomic::{AtomicU64, Ordering};

pub mod adapter;
pub mod queue;
pub mod session;
pub mod stabilizer;
pub mod transport;
pub mod types;

pub use adapter::StreamingAdapter;
pub use queue::DeliveryQueue;
pub use session::Session;
pub use stabilizer::TranscriptStabilizer;
pub use session::PartialResult;
pub use transport::{Transport, WsSink, WsStream, WsTransport};
pub use types::{ProviderConfig, TranscriptionChunk};

pub use murmur_foundation::{ConnectionState, TranscriptionError};

/// Generates unique session IDs.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique session ID.
pub fn next_session_id() -> u64 {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}
