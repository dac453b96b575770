//! Collaborator traits at the orchestrator's boundary.
//!
//! Capture, level metering, and text injection are owned by the host
//! application (GUI shell, OS integration). The orchestrator depends only on
//! these traits; the CLI ships file-backed implementations.

use async_trait::async_trait;

use murmur_foundation::TranscriptionError;

/// The capture sequence: one PCM16 buffer per call, `None` at end of audio.
#[async_trait]
pub trait AudioChunkStream: Send {
    async fn next_chunk(&mut self) -> Option<Vec<u8>>;
}

/// Instantaneous input level in `[0.0, 1.0]`, polled by the inactivity
/// monitor's grace period.
pub trait AudioLevelSource: Send + Sync {
    fn level(&self) -> f32;
}

/// Delivers finalized text to the focused application.
#[async_trait]
pub trait TextInjector: Send + Sync {
    async fn inject(&self, text: &str) -> Result<(), TranscriptionError>;
}
