use thiserror::Error;

/// Error taxonomy surfaced by the transcription core.
///
/// This is the closed set of failures the orchestrator reports upward. The
/// translation into user-facing copy (short message + hint) lives with the
/// UI layer; the flags it needs (`can_retry`, `needs_settings`) are derived
/// here so the taxonomy stays the single source of truth.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscriptionError {
    #[error("Invalid or missing API credential")]
    InvalidCredential,

    #[error("Unsupported model: {0}")]
    InvalidModel(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TranscriptionError {
    /// Whether offering a retry affordance makes sense for this failure.
    pub fn can_retry(&self) -> bool {
        match self {
            TranscriptionError::Network(_)
            | TranscriptionError::Audio(_)
            | TranscriptionError::Session(_) => true,
            TranscriptionError::InvalidCredential
            | TranscriptionError::InvalidModel(_)
            | TranscriptionError::Config(_) => false,
        }
    }

    /// Whether the failure points at something the user fixes in settings.
    pub fn needs_settings(&self) -> bool {
        matches!(
            self,
            TranscriptionError::InvalidCredential
                | TranscriptionError::InvalidModel(_)
                | TranscriptionError::Config(_)
        )
    }

    /// Retryability classification shared with the one-shot REST path.
    ///
    /// Connection-level failures (timeout, cannot connect, connection lost,
    /// DNS, no network) are retryable; auth failures, bad requests, and
    /// explicit provider errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TranscriptionError::Network(detail) => is_transient_connection_error(detail),
            TranscriptionError::Session(detail) => is_transient_connection_error(detail),
            _ => false,
        }
    }
}

/// Classify an error message as a transient connection failure.
///
/// Adapter receive loops use this to decide whether a failure is worth a
/// reconnect attempt. The match is deliberately on message text: the errors
/// arrive from several transport layers (WebSocket library, OS sockets,
/// DNS resolution) with no common structured type.
pub fn is_transient_connection_error(message: &str) -> bool {
    const TRANSIENT_MARKERS: [&str; 10] = [
        "connection",
        "socket",
        "network",
        "timeout",
        "timed out",
        "eof",
        "reset by peer",
        "broken pipe",
        "dns",
        "not connected",
    ];
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_markers_match_case_insensitively() {
        assert!(is_transient_connection_error("Connection reset by peer"));
        assert!(is_transient_connection_error("operation timed out"));
        assert!(is_transient_connection_error("unexpected EOF during read"));
        assert!(is_transient_connection_error("DNS resolution failed"));
        assert!(is_transient_connection_error("socket closed"));
    }

    #[test]
    fn provider_errors_are_not_transient() {
        assert!(!is_transient_connection_error("invalid api key"));
        assert!(!is_transient_connection_error("model not found"));
        assert!(!is_transient_connection_error("bad request"));
    }

    #[test]
    fn retry_flags_follow_taxonomy() {
        assert!(TranscriptionError::Network("connection lost".into()).can_retry());
        assert!(!TranscriptionError::InvalidCredential.can_retry());
        assert!(TranscriptionError::InvalidCredential.needs_settings());
        assert!(TranscriptionError::InvalidModel("gpt-5".into()).needs_settings());
        assert!(!TranscriptionError::Session("socket closed".into()).needs_settings());
    }

    #[test]
    fn retryable_requires_transient_detail() {
        assert!(TranscriptionError::Network("connection timeout".into()).is_retryable());
        assert!(!TranscriptionError::Network("403 forbidden".into()).is_retryable());
        assert!(!TranscriptionError::Config("missing model".into()).is_retryable());
    }
}
