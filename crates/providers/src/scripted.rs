//! Scripted backend for tests and offline demos.
//!
//! Each call to `invoke` consumes the next scripted attempt. Attempts either
//! fail outright or replay a fixed event sequence.

use async_trait::async_trait;
use kbrelay_core::backend::{EventStream, GenerationBackend, InvocationInput};
use kbrelay_core::error::BackendError;
use kbrelay_core::event::BackendEvent;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted call outcome.
#[derive(Debug, Clone)]
pub enum ScriptedAttempt {
    /// `invoke` itself fails.
    Fail(BackendError),

    /// `invoke` succeeds and the stream yields these items, then ends.
    Events(Vec<Result<BackendEvent, BackendError>>),

    /// Like `Events`, but the stream stays open afterwards until the
    /// consumer drops it.
    Stall(Vec<Result<BackendEvent, BackendError>>),
}

/// A backend that replays scripted attempts in order.
pub struct ScriptedBackend {
    attempts: Mutex<VecDeque<ScriptedAttempt>>,
    inputs: Mutex<Vec<InvocationInput>>,
}

impl ScriptedBackend {
    pub fn new(attempts: Vec<ScriptedAttempt>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// A backend whose single attempt streams the given text chunks.
    pub fn with_text(chunks: &[&str]) -> Self {
        let events = chunks
            .iter()
            .map(|c| Ok(BackendEvent::text(*c)))
            .collect();
        Self::new(vec![ScriptedAttempt::Events(events)])
    }

    /// How many times `invoke` has been called.
    pub fn call_count(&self) -> usize {
        self.inputs.lock().map(|i| i.len()).unwrap_or(0)
    }

    /// Every input passed to `invoke`, in call order.
    pub fn inputs(&self) -> Vec<InvocationInput> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, input: InvocationInput) -> Result<EventStream, BackendError> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input);
        }

        let attempt = self
            .attempts
            .lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .ok_or_else(|| BackendError::NotConfigured("script exhausted".into()))?;

        let (events, stall) = match attempt {
            ScriptedAttempt::Fail(e) => return Err(e),
            ScriptedAttempt::Events(events) => (events, false),
            ScriptedAttempt::Stall(events) => (events, true),
        };

        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
        tokio::spawn(async move {
            for item in events {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
            if stall {
                tx.closed().await;
            }
        });

        Ok(rx)
    }
}
