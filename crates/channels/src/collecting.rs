//! In-memory sink that records every piece. Used by tests and demos.

use async_trait::async_trait;
use kbrelay_core::channel::{DeliveryPiece, DeliverySink};
use kbrelay_core::error::DeliveryError;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Records delivered pieces; can be told to fail specific sends.
#[derive(Default)]
pub struct CollectingSink {
    pieces: Mutex<Vec<DeliveryPiece>>,
    fail_on: HashSet<usize>,
    calls: AtomicUsize,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the sends with these zero-based call indices. Failed pieces are
    /// not recorded.
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn pieces(&self) -> Vec<DeliveryPiece> {
        self.pieces.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Text of the recorded chunk pieces, in order.
    pub fn chunks(&self) -> Vec<String> {
        self.pieces()
            .into_iter()
            .filter_map(|p| match p {
                DeliveryPiece::Chunk { chunk } => Some(chunk),
                _ => None,
            })
            .collect()
    }

    /// Number of `send` calls, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn send(&self, piece: &DeliveryPiece) -> Result<(), DeliveryError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&call) {
            return Err(DeliveryError::DeliveryFailed {
                channel: "collecting".into(),
                reason: format!("scripted failure on send #{call}"),
            });
        }
        if let Ok(mut pieces) = self.pieces.lock() {
            pieces.push(piece.clone());
        }
        Ok(())
    }
}
