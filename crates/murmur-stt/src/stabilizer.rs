//! Partial-result stabilizer.
//!
//! Streaming providers keep revising the tail of a partial result until a
//! word boundary is confirmed. This component turns the raw (text, is_final)
//! chunk sequence into a "safe to display" partial plus an accumulating list
//! of finalized segments. It performs no I/O and is deterministic given its
//! inputs.

use crate::types::TranscriptionChunk;

#[derive(Debug, Default)]
pub struct TranscriptStabilizer {
    current_partial: String,
    finalized_segments: Vec<String>,
    receiving_partials: bool,
}

impl TranscriptStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the new safe partial display text.
    pub fn observe(&mut self, chunk: &TranscriptionChunk) -> String {
        if chunk.is_final {
            self.push_final(&chunk.text);
            String::new()
        } else {
            self.push_partial(&chunk.text)
        }
    }

    /// Compute the safe partial for a non-final chunk.
    ///
    /// The raw text is split on spaces; unless it ends in a space, the last
    /// (possibly still-revising) word is dropped. A lone word with no
    /// trailing space yields an empty safe partial: nothing is shown until
    /// at least one word boundary is confirmed.
    pub fn push_partial(&mut self, text: &str) -> String {
        self.receiving_partials = true;
        let safe = if text.ends_with(' ') {
            text.trim().to_string()
        } else {
            match text.rsplit_once(' ') {
                Some((confirmed, _unstable)) => confirmed.trim().to_string(),
                None => String::new(),
            }
        };
        self.current_partial = safe.clone();
        safe
    }

    /// Record a finalized segment and clear the current partial.
    pub fn push_final(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.finalized_segments.push(trimmed.to_string());
        }
        self.current_partial.clear();
        self.receiving_partials = false;
    }

    /// Finalized segments plus the current partial, space-joined.
    pub fn complete_transcription(&self) -> String {
        let mut out = self.finalized_segments.join(" ");
        if !self.current_partial.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&self.current_partial);
        }
        out
    }

    /// Finalized segments only.
    pub fn final_transcription(&self) -> String {
        self.finalized_segments.join(" ")
    }

    pub fn current_partial(&self) -> &str {
        &self.current_partial
    }

    pub fn is_receiving_partials(&self) -> bool {
        self.receiving_partials
    }

    /// Clear all state for session reuse.
    pub fn reset(&mut self) {
        self.current_partial.clear();
        self.finalized_segments.clear();
        self.receiving_partials = false;
    }
}
