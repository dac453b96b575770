//! Murmur orchestrator: ties the session layer, the provider adapters, and
//! the host application's collaborators (capture, level metering, text
//! injection) into one per-recording state machine.

pub mod collab;
pub mod inactivity;
pub mod manager;

pub use collab::{AudioChunkStream, AudioLevelSource, TextInjector};
pub use inactivity::{InactivityConfig, InactivityMonitor};
pub use manager::{CompletionSummary, TranscriptionManager, TranscriptionPhase};
