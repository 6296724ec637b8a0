//! The streaming orchestration core for kbrelay.
//!
//! One request flows through these stages:
//!
//! 1. **Resolve** the role framing for the user ([`instructions`])
//! 2. **Invoke** the generation backend with bounded retry ([`invocation`])
//! 3. **Demux** each backend record into text and trace lanes ([`demux`])
//! 4. **Resegment** text into delivery-sized pieces ([`resegment`])
//! 5. **Accumulate** deduplicated citations from both lanes ([`citations`])
//! 6. **Finalize**: push the complete result and hand off analytics
//!
//! [`Orchestrator`] runs the whole sequence against any delivery sink.

pub mod citations;
pub mod demux;
pub mod instructions;
pub mod invocation;
pub mod orchestrator;
pub mod resegment;

pub use citations::CitationAccumulator;
pub use demux::demux;
pub use invocation::{AgentGateway, RetryPolicy};
pub use orchestrator::{
    OrchestrationOutcome, Orchestrator, OrchestratorSettings, OutcomeBody, Phase,
};
pub use resegment::Resegmenter;

use kbrelay_core::analytics::AnalyticsSink;
use kbrelay_core::backend::GenerationBackend;
use std::sync::Arc;

/// Wire an orchestrator from configuration.
pub fn build_from_config(
    config: &kbrelay_config::AppConfig,
    backend: Arc<dyn GenerationBackend>,
    analytics: Arc<dyn AnalyticsSink>,
) -> Orchestrator {
    let gateway = AgentGateway::new(backend, RetryPolicy::from_config(&config.orchestrator))
        .with_trace(config.backend.enable_trace);
    Orchestrator::new(
        gateway,
        analytics,
        OrchestratorSettings::from_config(&config.orchestrator),
    )
}
