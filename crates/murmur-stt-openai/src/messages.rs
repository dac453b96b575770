//! Wire messages for the realtime transcription protocol.
//!
//! Inbound messages are discriminated on their `type` field. Outbound
//! messages are built with `serde_json::json!` since two of them need
//! explicit `null` fields the provider treats as "disabled".

use serde::Deserialize;
use serde_json::json;

use murmur_stt::ProviderConfig;

/// Inbound server events, demultiplexed by the receive loop.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Informational; the session is not usable until `session.updated`.
    #[serde(rename = "session.created")]
    SessionCreated,

    /// Acknowledges the configuration message; triggers confirmation.
    #[serde(rename = "session.updated")]
    SessionUpdated,

    /// Informational; the provider committed the audio buffer.
    #[serde(rename = "input_audio_buffer.committed")]
    BufferCommitted,

    /// Incremental transcription text.
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta { delta: String },

    /// Final transcription for the committed buffer.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },

    #[serde(rename = "error")]
    Error { error: ApiError },

    /// Anything this adapter does not recognize; logged and ignored.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Session-configuration message sent right after connect.
///
/// Voice activity detection is explicitly disabled (`turn_detection: null`):
/// the host application controls audio segmentation, not the provider.
pub fn session_update(config: &ProviderConfig) -> String {
    json!({
        "type": "session.update",
        "session": {
            "input_audio_format": "pcm16",
            "input_audio_transcription": {
                "model": config.model,
                "prompt": config.prompt,
                "language": config.language,
            },
            "input_audio_noise_reduction": { "type": "near_field" },
            "turn_detection": null,
        }
    })
    .to_string()
}

/// One audio buffer, base64-embedded.
pub fn audio_append(audio_b64: &str) -> String {
    json!({
        "type": "input_audio_buffer.append",
        "audio": audio_b64,
    })
    .to_string()
}

/// End-of-audio signal.
pub fn buffer_commit() -> String {
    json!({ "type": "input_audio_buffer.commit" }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_and_completed_parse() {
        let delta: ServerEvent = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"hi the"}"#,
        )
        .unwrap();
        assert!(matches!(delta, ServerEvent::TranscriptionDelta { delta } if delta == "hi the"));

        let done: ServerEvent = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hi there"}"#,
        )
        .unwrap();
        assert!(
            matches!(done, ServerEvent::TranscriptionCompleted { transcript } if transcript == "hi there")
        );
    }

    #[test]
    fn unknown_types_fall_through_to_unrecognized() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unrecognized));
    }

    #[test]
    fn error_event_carries_message() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"error","error":{"message":"invalid api key","code":"invalid_api_key"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "invalid api key");
                assert_eq!(error.code.as_deref(), Some("invalid_api_key"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn session_update_disables_turn_detection() {
        let config = ProviderConfig::new("sk-test", "gpt-4o-transcribe").with_language("en");
        let raw = session_update(&config);
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "session.update");
        assert!(value["session"]["turn_detection"].is_null());
        assert_eq!(
            value["session"]["input_audio_transcription"]["model"],
            "gpt-4o-transcribe"
        );
        assert_eq!(value["session"]["input_audio_format"], "pcm16");
    }
}
