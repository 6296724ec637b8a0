//! Delivery sink trait: the abstraction over client channels.
//!
//! The orchestrator pushes `DeliveryPiece`s in generation order. Whether they
//! travel over a registered WebSocket connection, an SSE response, or a
//! callback endpoint is the adapter's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::citation::FinalResult;
use crate::error::DeliveryError;

/// One message pushed to the client.
///
/// Wire protocol:
/// - `chunk`   : a resegmented piece of partial text
/// - `complete`: the final answer with deduplicated citations
/// - `error`   : the invocation failed; earlier chunks stand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryPiece {
    Chunk { chunk: String },

    Complete {
        #[serde(flatten)]
        result: FinalResult,
    },

    Error { error: String },
}

impl DeliveryPiece {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { chunk: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Piece kind, also used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// JSON text of the piece.
    pub fn to_json(&self) -> Result<String, DeliveryError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The client channel capability.
///
/// `send` may fail per call; the caller decides whether that is fatal.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Human-readable adapter name (e.g., "connection", "event_stream").
    fn name(&self) -> &str;

    /// Push one piece to the client.
    async fn send(&self, piece: &DeliveryPiece) -> Result<(), DeliveryError>;
}

/// A sink for invocations without a client channel. Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl DeliverySink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(&self, piece: &DeliveryPiece) -> Result<(), DeliveryError> {
        tracing::trace!(kind = piece.kind(), "No delivery channel, piece dropped");
        Ok(())
    }
}
