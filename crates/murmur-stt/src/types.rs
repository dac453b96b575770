//! Core types shared by the session layer and the provider adapters.

use std::time::Instant;

/// Immutable request parameters for one provider session.
///
/// Constructed by the caller (UI layer or CLI); read-only inside this layer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderConfig {
    /// Provider API credential.
    pub api_key: String,
    /// Model identifier (e.g. "nova-3", "gpt-4o-transcribe").
    pub model: String,
    /// Optional BCP-47 language hint.
    pub language: Option<String>,
    /// Optional system prompt, for providers that accept one.
    pub prompt: Option<String>,
    /// Optional keyword boosts, for providers that accept them.
    pub keywords: Vec<String>,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            language: None,
            prompt: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }
}

/// One incremental transcription result from a provider.
///
/// Chunks for a given session are emitted in the order the provider produced
/// them; the last chunk before stream closure carries `is_final = true`
/// whenever a final transcript exists.
#[derive(Debug, Clone)]
pub struct TranscriptionChunk {
    pub text: String,
    pub is_final: bool,
    pub timestamp: Instant,
}

impl TranscriptionChunk {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            timestamp: Instant::now(),
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            timestamp: Instant::now(),
        }
    }
}
