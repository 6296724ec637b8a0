//! Events produced by the generation backend.
//!
//! A `BackendEvent` is one record exactly as the backend delivered it: it may
//! carry a text chunk, a trace, both, or neither. The demuxer turns each
//! record into zero or more `StreamEvent`s on the text and trace lanes.

use serde::{Deserialize, Serialize};

/// One record from the backend's event sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendEvent {
    /// Partial answer output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkPart>,

    /// Orchestration trace, kept as raw JSON. Its shape is owned by the
    /// backend and read defensively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<serde_json::Value>,
}

/// The chunk part of a backend record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkPart {
    /// Decoded UTF-8 text, when the chunk carried bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Citation attribution attached to this piece of output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<serde_json::Value>,
}

impl BackendEvent {
    /// A record carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            chunk: Some(ChunkPart {
                text: Some(text.into()),
                attribution: None,
            }),
            trace: None,
        }
    }

    /// A record carrying only a trace.
    pub fn trace(trace: serde_json::Value) -> Self {
        Self {
            chunk: None,
            trace: Some(trace),
        }
    }

    /// Attach attribution to the chunk part, creating it if needed.
    pub fn with_attribution(mut self, attribution: serde_json::Value) -> Self {
        self.chunk.get_or_insert_with(ChunkPart::default).attribution = Some(attribution);
        self
    }

    /// Attach a trace to this record.
    pub fn with_trace(mut self, trace: serde_json::Value) -> Self {
        self.trace = Some(trace);
        self
    }
}

/// Text-lane event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextEvent {
    /// Partial text; empty when the chunk carried only attribution.
    pub text: String,
    pub attribution: Option<serde_json::Value>,
}

/// Trace-lane event.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub trace: serde_json::Value,
}

/// A classified backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(TextEvent),
    Trace(TraceEvent),
}
