//! Wire messages for the streaming protocol.
//!
//! Inbound text frames are JSON tagged on `type`; the variant names match
//! the provider's discriminators exactly. Binary frames are never expected
//! inbound (audio flows outbound only).

use serde::Deserialize;
use serde_json::json;

/// Inbound events, demultiplexed by the receive loop.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// First frame on a healthy connection; confirms the session when the
    /// synchronous confirmation raced with a slow connect.
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },

    /// A transcription result, partial or final.
    Results {
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
        channel: Channel,
    },

    Error {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Default)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
}

impl StreamEvent {
    /// Best transcript of a `Results` event, if any text was recognized.
    pub fn transcript(&self) -> Option<&str> {
        match self {
            StreamEvent::Results { channel, .. } => channel
                .alternatives
                .first()
                .map(|alt| alt.transcript.as_str())
                .filter(|t| !t.trim().is_empty()),
            _ => None,
        }
    }
}

/// End-of-audio control frame.
pub fn close_stream() -> String {
    json!({ "type": "CloseStream" }).to_string()
}
