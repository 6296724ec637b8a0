//! Generation backend trait: the abstraction over the answering agent.
//!
//! A backend receives one question for a session and returns a lazily
//! produced, single-pass sequence of `BackendEvent`s. The sequence is an mpsc
//! receiver: it is consumed exactly once, in arrival order, and cannot be
//! restarted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::event::BackendEvent;

/// The backend's event sequence.
pub type EventStream = tokio::sync::mpsc::Receiver<Result<BackendEvent, BackendError>>;

/// Attributes persisted by the backend for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttributes {
    pub user_role: String,
    pub role_instructions: String,
}

/// Attributes re-sent with every turn and folded into the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSessionAttributes {
    pub role_context: String,
}

/// Everything the backend needs for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationInput {
    pub session_id: String,
    pub input_text: String,

    /// Ask the backend to emit orchestration traces (knowledge-base lookups).
    #[serde(default)]
    pub enable_trace: bool,

    pub session_attributes: SessionAttributes,
    pub prompt_session_attributes: PromptSessionAttributes,
}

/// The core backend trait.
///
/// `invoke` may fail transiently (network, throttling) or fatally (bad
/// credentials); see [`BackendError::is_retryable`].
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "agent-runtime").
    fn name(&self) -> &str;

    /// Start one turn and return its event sequence.
    async fn invoke(&self, input: InvocationInput) -> Result<EventStream, BackendError>;

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> Result<bool, BackendError> {
        Ok(true)
    }
}
