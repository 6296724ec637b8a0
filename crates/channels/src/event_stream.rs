//! Server-push event stream delivery.
//!
//! Pieces go into an in-process queue whose receiving end is attached to an
//! HTTP response and rendered as SSE events by the gateway.

use async_trait::async_trait;
use kbrelay_core::channel::{DeliveryPiece, DeliverySink};
use kbrelay_core::error::DeliveryError;
use tokio::sync::mpsc;

/// Feeds pieces to one event-stream response.
pub struct EventStreamSink {
    tx: mpsc::Sender<DeliveryPiece>,
}

impl EventStreamSink {
    /// Create a sink and the receiver the response reads from.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DeliveryPiece>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DeliverySink for EventStreamSink {
    fn name(&self) -> &str {
        "event_stream"
    }

    async fn send(&self, piece: &DeliveryPiece) -> Result<(), DeliveryError> {
        self.tx
            .send(piece.clone())
            .await
            .map_err(|_| DeliveryError::DeliveryFailed {
                channel: "event_stream".into(),
                reason: "client disconnected".into(),
            })
    }
}
