//! Generation backend implementations for kbrelay.
//!
//! All backends implement the `kbrelay_core::GenerationBackend` trait.
//! `build_from_config` selects the HTTP agent-runtime backend from
//! configuration; `ScriptedBackend` serves tests and offline demos.

pub mod http_agent;
pub mod scripted;

pub use http_agent::HttpAgentBackend;
pub use scripted::{ScriptedAttempt, ScriptedBackend};

use kbrelay_core::backend::GenerationBackend;
use kbrelay_core::error::BackendError;
use std::sync::Arc;

/// Build the configured backend.
pub fn build_from_config(
    config: &kbrelay_config::AppConfig,
) -> Result<Arc<dyn GenerationBackend>, BackendError> {
    let backend = HttpAgentBackend::from_config(&config.backend)?;
    tracing::debug!(
        base_url = %config.backend.base_url,
        agent_id = %config.backend.agent_id,
        "Built agent-runtime backend"
    );
    Ok(Arc::new(backend))
}
