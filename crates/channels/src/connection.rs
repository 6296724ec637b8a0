//! Registered-connection delivery.
//!
//! Long-lived client connections (WebSocket sessions) register an outbound
//! queue under a connection id. A `ConnectionSink` pushes pieces for one
//! request to one of those queues as JSON text.
//!
//! Connection ids that start with the synthetic prefix belong to test
//! harnesses with no live client. Sends to them succeed without doing
//! anything except logging.

use async_trait::async_trait;
use kbrelay_core::channel::{DeliveryPiece, DeliverySink};
use kbrelay_core::error::DeliveryError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outbound queues of the live connections.
pub struct ConnectionRegistry {
    outbound: tokio::sync::Mutex<HashMap<String, mpsc::Sender<String>>>,
    synthetic_prefix: String,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new("mock-")
    }
}

impl ConnectionRegistry {
    pub fn new(synthetic_prefix: impl Into<String>) -> Self {
        Self {
            outbound: tokio::sync::Mutex::new(HashMap::new()),
            synthetic_prefix: synthetic_prefix.into(),
        }
    }

    pub fn from_config(config: &kbrelay_config::DeliveryConfig) -> Self {
        Self::new(config.synthetic_prefix.clone())
    }

    /// Register a connection and get the receiving end of its queue.
    /// Re-registering an id replaces the old queue.
    pub async fn register(&self, connection_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        self.outbound
            .lock()
            .await
            .insert(connection_id.to_string(), tx);
        info!(connection_id = %connection_id, "Connection registered");
        rx
    }

    pub async fn unregister(&self, connection_id: &str) {
        if self.outbound.lock().await.remove(connection_id).is_some() {
            info!(connection_id = %connection_id, "Connection removed");
        }
    }

    pub async fn active_connections(&self) -> usize {
        self.outbound.lock().await.len()
    }

    pub fn is_synthetic(&self, connection_id: &str) -> bool {
        !self.synthetic_prefix.is_empty() && connection_id.starts_with(&self.synthetic_prefix)
    }

    /// Push raw text to a connection.
    pub async fn push(&self, connection_id: &str, text: String) -> Result<(), DeliveryError> {
        if self.is_synthetic(connection_id) {
            info!(
                connection_id = %connection_id,
                len = text.len(),
                "Synthetic connection, skipping send"
            );
            return Ok(());
        }

        // Clone the sender so the lock is not held across a full queue
        let tx = self
            .outbound
            .lock()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| DeliveryError::NotConnected(connection_id.to_string()))?;

        tx.send(text)
            .await
            .map_err(|_| DeliveryError::DeliveryFailed {
                channel: "connection".into(),
                reason: format!("Connection '{connection_id}' closed"),
            })
    }

    /// A sink bound to one connection.
    pub fn sink(self: &Arc<Self>, connection_id: impl Into<String>) -> ConnectionSink {
        ConnectionSink {
            registry: Arc::clone(self),
            connection_id: connection_id.into(),
        }
    }
}

/// Delivers one request's pieces to a registered connection.
pub struct ConnectionSink {
    registry: Arc<ConnectionRegistry>,
    connection_id: String,
}

#[async_trait]
impl DeliverySink for ConnectionSink {
    fn name(&self) -> &str {
        "connection"
    }

    async fn send(&self, piece: &DeliveryPiece) -> Result<(), DeliveryError> {
        let text = piece.to_json()?;
        debug!(
            connection_id = %self.connection_id,
            kind = piece.kind(),
            len = text.len(),
            "Pushing piece"
        );
        self.registry.push(&self.connection_id, text).await
    }
}
