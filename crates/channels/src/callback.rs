//! Callback delivery: POST each piece to a connection-management endpoint.
//!
//! Used when connections are held by an external gateway that exposes
//! `POST {endpoint}/@connections/{connection_id}`. Bodies can be signed with
//! HMAC-SHA256 so the receiver can authenticate them; the signature travels
//! as `X-Kbrelay-Signature: sha256=<hex>`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use kbrelay_core::channel::{DeliveryPiece, DeliverySink};
use kbrelay_core::error::DeliveryError;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Kbrelay-Signature";

/// Callback endpoint settings shared by all sinks.
#[derive(Clone)]
pub struct CallbackConfig {
    pub endpoint: String,
    pub signing_secret: Option<String>,
    pub synthetic_prefix: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for CallbackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackConfig")
            .field("endpoint", &self.endpoint)
            .field(
                "signing_secret",
                &self.signing_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("synthetic_prefix", &self.synthetic_prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CallbackConfig {
    /// `None` when no callback endpoint is configured. A blank endpoint
    /// counts as none.
    pub fn from_config(config: &kbrelay_config::DeliveryConfig) -> Option<Self> {
        let endpoint = config
            .connection_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())?;
        Some(Self {
            endpoint: endpoint.to_string(),
            signing_secret: config.signing_secret.clone(),
            synthetic_prefix: config.synthetic_prefix.clone(),
            timeout: Duration::from_secs(10),
        })
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`, with the `sha256=` prefix.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        DeliveryError::DeliveryFailed {
            channel: "callback".into(),
            reason: format!("signing key rejected: {e}"),
        }
    })?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` (or bare hex) signature in constant time.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let sig_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Delivers one request's pieces by HTTP callback.
pub struct CallbackSink {
    config: CallbackConfig,
    connection_id: String,
    client: reqwest::Client,
}

impl CallbackSink {
    pub fn new(
        config: CallbackConfig,
        connection_id: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            connection_id: connection_id.into(),
            client,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/@connections/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.connection_id
        )
    }
}

#[async_trait]
impl DeliverySink for CallbackSink {
    fn name(&self) -> &str {
        "callback"
    }

    async fn send(&self, piece: &DeliveryPiece) -> Result<(), DeliveryError> {
        if !self.config.synthetic_prefix.is_empty()
            && self.connection_id.starts_with(&self.config.synthetic_prefix)
        {
            info!(
                connection_id = %self.connection_id,
                kind = piece.kind(),
                "Synthetic connection, skipping callback"
            );
            return Ok(());
        }

        let body = piece.to_json()?;
        let mut request = self
            .client
            .post(self.url())
            .timeout(self.config.timeout)
            .header("Content-Type", "application/json");
        if let Some(secret) = self.config.signing_secret.as_deref().filter(|s| !s.is_empty()) {
            request = request.header(SIGNATURE_HEADER, sign(secret, body.as_bytes())?);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::DeliveryFailed {
                channel: "callback".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        debug!(connection_id = %self.connection_id, status = status.as_u16(), "Callback sent");

        // The connection manager answers 410 Gone for closed connections
        if status.as_u16() == 410 {
            return Err(DeliveryError::NotConnected(self.connection_id.clone()));
        }
        if !status.is_success() {
            return Err(DeliveryError::DeliveryFailed {
                channel: "callback".into(),
                reason: format!("endpoint returned {status}"),
            });
        }
        Ok(())
    }
}
