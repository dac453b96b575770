//! Foundation types for the Murmur transcription layer.
//!
//! This crate holds the pieces shared by every other crate in the workspace:
//! the transcription error taxonomy (with the retryability classification
//! used by both the streaming adapters and the REST path), the connection
//! state hub observed by the UI layer, and a clock abstraction for
//! deterministic testing of time-dependent code.

pub mod clock;
pub mod error;
pub mod state;

pub use clock::{real_clock, test_clock, Clock, RealClock, SharedClock, TestClock};
pub use error::{is_transient_connection_error, TranscriptionError};
pub use state::{ConnectionState, ConnectionStateHub};
