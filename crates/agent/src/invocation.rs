//! Agent invocation gateway: bounded retry around the backend call.
//!
//! Each attempt invokes the backend once. A failed attempt before the last is
//! logged and retried after an exponential backoff; the last failure is
//! returned to the caller. Only the invocation is retried: once the backend
//! has handed back an event stream, failures inside it belong to the caller.

use kbrelay_core::backend::{
    EventStream, GenerationBackend, InvocationInput, PromptSessionAttributes, SessionAttributes,
};
use kbrelay_core::error::BackendError;
use kbrelay_core::request::GenerationRequest;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::instructions;

/// Retry budget and backoff bounds for invocation attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &kbrelay_config::OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.backoff_initial_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `attempt` (1-based):
    /// `min(initial * 2^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Invokes the generation backend for one request.
#[derive(Clone)]
pub struct AgentGateway {
    backend: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
    enable_trace: bool,
}

impl AgentGateway {
    pub fn new(backend: Arc<dyn GenerationBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            enable_trace: true,
        }
    }

    /// Toggle backend orchestration traces. Trace-sourced citations need them.
    pub fn with_trace(mut self, enable_trace: bool) -> Self {
        self.enable_trace = enable_trace;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Build the backend input for a request.
    ///
    /// Role instructions travel twice: as session attributes, which the
    /// backend keeps for the whole session, and as prompt attributes, which
    /// are re-sent every turn.
    pub fn build_input(&self, request: &GenerationRequest) -> InvocationInput {
        let role_instructions = instructions::for_role(request.role());
        InvocationInput {
            session_id: request.session_id().to_string(),
            input_text: request.query().to_string(),
            enable_trace: self.enable_trace,
            session_attributes: SessionAttributes {
                user_role: request.role().to_string(),
                role_instructions: role_instructions.to_string(),
            },
            prompt_session_attributes: PromptSessionAttributes {
                role_context: role_instructions.to_string(),
            },
        }
    }

    /// Invoke the backend, retrying within the budget.
    pub async fn invoke(&self, request: &GenerationRequest) -> Result<EventStream, BackendError> {
        let input = self.build_input(request);
        let total = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(
                backend = %self.backend.name(),
                session_id = %input.session_id,
                attempt,
                total,
                "Invoking backend"
            );

            match self.backend.invoke(input.clone()).await {
                Ok(stream) => {
                    if attempt > 1 {
                        info!(attempt, "Backend invocation succeeded after retry");
                    }
                    return Ok(stream);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, attempt, "Backend invocation failed, not retryable");
                    return Err(e);
                }
                Err(e) if attempt >= total => {
                    warn!(error = %e, attempt, total, "Backend invocation failed, budget exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        total,
                        backoff_ms = delay.as_millis() as u64,
                        "Backend invocation failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbrelay_core::event::BackendEvent;
    use kbrelay_providers::{ScriptedAttempt, ScriptedBackend};

    fn request(role: Option<&str>) -> GenerationRequest {
        GenerationRequest::new("What is ALGEE?", Some("sess-1"), role).unwrap()
    }

    fn ok_stream() -> ScriptedAttempt {
        ScriptedAttempt::Events(vec![Ok(BackendEvent::text("Hi."))])
    }

    fn network_down() -> ScriptedAttempt {
        ScriptedAttempt::Fail(BackendError::Network("connection refused".into()))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn input_carries_role_context_twice() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let gateway = AgentGateway::new(backend, RetryPolicy::default());
        let input = gateway.build_input(&request(Some("instructor")));

        assert_eq!(input.session_id, "sess-1");
        assert_eq!(input.input_text, "What is ALGEE?");
        assert!(input.enable_trace);
        assert_eq!(input.session_attributes.user_role, "instructor");
        assert_eq!(
            input.session_attributes.role_instructions,
            input.prompt_session_attributes.role_context
        );
        assert!(input.prompt_session_attributes.role_context.contains("Instructor"));
    }

    #[tokio::test]
    async fn fail_then_succeed_within_budget() {
        let backend = Arc::new(ScriptedBackend::new(vec![network_down(), ok_stream()]));
        let gateway = AgentGateway::new(backend.clone(), RetryPolicy::immediate(2));

        let mut stream = gateway.invoke(&request(None)).await.unwrap();
        assert_eq!(stream.recv().await.unwrap().unwrap(), BackendEvent::text("Hi."));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn both_attempts_fail() {
        let backend = Arc::new(ScriptedBackend::new(vec![network_down(), network_down()]));
        let gateway = AgentGateway::new(backend.clone(), RetryPolicy::immediate(2));

        let err = gateway.invoke(&request(None)).await.unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ScriptedAttempt::Fail(BackendError::AuthenticationFailed("bad key".into())),
            ok_stream(),
        ]));
        let gateway = AgentGateway::new(backend.clone(), RetryPolicy::immediate(3));

        let err = gateway.invoke(&request(None)).await.unwrap_err();
        assert!(matches!(err, BackendError::AuthenticationFailed(_)));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_backoff_between_attempts() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            network_down(),
            network_down(),
            ok_stream(),
        ]));
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        };
        let gateway = AgentGateway::new(backend.clone(), policy);

        let start = tokio::time::Instant::now();
        gateway.invoke(&request(None)).await.unwrap();

        // 500ms after the first failure, 1000ms after the second
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn zero_budget_still_tries_once() {
        let backend = Arc::new(ScriptedBackend::new(vec![ok_stream()]));
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let gateway = AgentGateway::new(backend.clone(), policy);
        assert!(gateway.invoke(&request(None)).await.is_ok());
        assert_eq!(backend.call_count(), 1);
    }
}
