//! The streaming orchestrator.
//!
//! One `run` drives one request through
//! `Idle -> Invoking -> Streaming -> Finalizing -> Done`, or into `Errored`
//! from any working phase. Backend events are handled strictly in arrival
//! order: text is resegmented and pushed to the sink piece by piece, and
//! citations are accumulated from both lanes. At stream end the final result
//! is pushed, analytics are handed off, and the synchronous outcome returned.
//!
//! Nothing is shared between runs. Partial text and citations die with the
//! run on failure or cancellation.

use chrono::Utc;
use kbrelay_core::analytics::{AnalyticsRecord, AnalyticsSink};
use kbrelay_core::backend::EventStream;
use kbrelay_core::channel::{DeliveryPiece, DeliverySink};
use kbrelay_core::citation::FinalResult;
use kbrelay_core::error::{BackendError, Error};
use kbrelay_core::event::{BackendEvent, StreamEvent};
use kbrelay_core::request::GenerationRequest;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::citations::CitationAccumulator;
use crate::demux::demux;
use crate::invocation::AgentGateway;
use crate::resegment::Resegmenter;

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Invoking,
    Streaming,
    Finalizing,
    Done,
    Errored,
}

/// Tunables for a run.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub resegmenter: Resegmenter,

    /// Longest wait for the next backend event. `None` waits forever.
    pub event_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            resegmenter: Resegmenter::default(),
            event_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &kbrelay_config::OrchestratorConfig) -> Self {
        Self {
            resegmenter: Resegmenter::from_config(config),
            event_timeout: config.event_timeout(),
        }
    }
}

/// Synchronous body: the final result, or an error message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutcomeBody {
    Completed(FinalResult),
    Failed { error: String },
}

/// What the caller of `run` gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationOutcome {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: OutcomeBody,

    /// Terminal phase, `Done` or `Errored`.
    #[serde(skip)]
    pub phase: Phase,
}

impl OrchestrationOutcome {
    fn completed(result: FinalResult) -> Self {
        Self {
            status_code: 200,
            body: OutcomeBody::Completed(result),
            phase: Phase::Done,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            status_code: 500,
            body: OutcomeBody::Failed { error: message },
            phase: Phase::Errored,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn result(&self) -> Option<&FinalResult> {
        match &self.body {
            OutcomeBody::Completed(result) => Some(result),
            OutcomeBody::Failed { .. } => None,
        }
    }
}

/// Drives requests from backend invocation to final delivery.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: AgentGateway,
    analytics: Arc<dyn AnalyticsSink>,
    settings: OrchestratorSettings,
}

/// Per-run state.
struct Invocation<'a> {
    request: &'a GenerationRequest,
    sink: &'a dyn DeliverySink,
    phase: Phase,
    full_text: String,
    citations: CitationAccumulator,
    pieces_sent: usize,
    pieces_dropped: usize,
}

impl<'a> Invocation<'a> {
    fn new(request: &'a GenerationRequest, sink: &'a dyn DeliverySink) -> Self {
        Self {
            request,
            sink,
            phase: Phase::Idle,
            full_text: String::new(),
            citations: CitationAccumulator::new(),
            pieces_sent: 0,
            pieces_dropped: 0,
        }
    }

    fn transition(&mut self, next: Phase) {
        debug!(
            session_id = %self.request.session_id(),
            from = ?self.phase,
            to = ?next,
            "Phase transition"
        );
        self.phase = next;
    }

    /// Best-effort push of one piece.
    async fn deliver(&mut self, piece: &DeliveryPiece) {
        match self.sink.send(piece).await {
            Ok(()) => {
                self.pieces_sent += 1;
                trace!(sink = %self.sink.name(), kind = piece.kind(), "Piece delivered");
            }
            Err(e) => {
                self.pieces_dropped += 1;
                warn!(
                    sink = %self.sink.name(),
                    kind = piece.kind(),
                    error = %e,
                    "Failed to deliver piece, continuing"
                );
            }
        }
    }
}

impl Orchestrator {
    pub fn new(
        gateway: AgentGateway,
        analytics: Arc<dyn AnalyticsSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            gateway,
            analytics,
            settings,
        }
    }

    /// Run one request, pushing pieces to `sink`.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        sink: &dyn DeliverySink,
    ) -> OrchestrationOutcome {
        let mut inv = Invocation::new(request, sink);
        let result = self.drive(&mut inv).await;
        self.conclude(inv, result).await
    }

    /// Like `run`, but gives up once `deadline` has passed.
    pub async fn run_with_deadline(
        &self,
        request: &GenerationRequest,
        sink: &dyn DeliverySink,
        deadline: Duration,
    ) -> OrchestrationOutcome {
        let mut inv = Invocation::new(request, sink);
        let result = match tokio::time::timeout(deadline, self.drive(&mut inv)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Backend(BackendError::Timeout(format!(
                "invocation exceeded {}ms deadline",
                deadline.as_millis()
            )))),
        };
        self.conclude(inv, result).await
    }

    async fn drive(&self, inv: &mut Invocation<'_>) -> Result<FinalResult, Error> {
        info!(
            session_id = %inv.request.session_id(),
            role = %inv.request.role(),
            sink = %inv.sink.name(),
            backend = %self.gateway.backend_name(),
            "Received query"
        );

        inv.transition(Phase::Invoking);
        let mut stream = self.gateway.invoke(inv.request).await?;

        inv.transition(Phase::Streaming);
        while let Some(event) = self.next_event(&mut stream).await? {
            for lane in demux(event) {
                self.handle(inv, lane).await;
            }
        }

        inv.transition(Phase::Finalizing);
        let result = FinalResult {
            full_text: std::mem::take(&mut inv.full_text),
            citations: std::mem::take(&mut inv.citations).into_citations(),
        };

        info!(
            session_id = %inv.request.session_id(),
            chars = result.full_text.chars().count(),
            citations = result.citations.len(),
            pieces_sent = inv.pieces_sent,
            pieces_dropped = inv.pieces_dropped,
            "Streaming complete"
        );

        inv.deliver(&DeliveryPiece::Complete {
            result: result.clone(),
        })
        .await;

        self.analytics.dispatch(AnalyticsRecord {
            session_id: inv.request.session_id().to_string(),
            query: inv.request.query().to_string(),
            response: result.full_text.clone(),
            user_role: inv.request.role().to_string(),
            timestamp: Utc::now(),
        });

        Ok(result)
    }

    /// Next backend event, bounded by the idle timeout.
    async fn next_event(&self, stream: &mut EventStream) -> Result<Option<BackendEvent>, Error> {
        let item = match self.settings.event_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.recv())
                .await
                .map_err(|_| {
                    BackendError::Timeout(format!(
                        "no backend event for {}s",
                        limit.as_secs_f32()
                    ))
                })?,
            None => stream.recv().await,
        };

        match item {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn handle(&self, inv: &mut Invocation<'_>, lane: StreamEvent) {
        match lane {
            StreamEvent::Text(text_event) => {
                if !text_event.text.is_empty() {
                    debug!(len = text_event.text.len(), "Backend chunk");
                    inv.full_text.push_str(&text_event.text);
                    for piece in self.settings.resegmenter.segment(&text_event.text) {
                        inv.deliver(&DeliveryPiece::chunk(piece)).await;
                    }
                }
                if let Some(attribution) = &text_event.attribution {
                    inv.citations.ingest_attribution(attribution);
                }
            }
            StreamEvent::Trace(trace_event) => {
                inv.citations.ingest_trace(&trace_event.trace);
            }
        }
    }

    async fn conclude(
        &self,
        mut inv: Invocation<'_>,
        result: Result<FinalResult, Error>,
    ) -> OrchestrationOutcome {
        match result {
            Ok(result) => {
                inv.transition(Phase::Done);
                OrchestrationOutcome::completed(result)
            }
            Err(e) => {
                let failed_in = inv.phase;
                inv.transition(Phase::Errored);
                error!(
                    session_id = %inv.request.session_id(),
                    phase = ?failed_in,
                    error = %e,
                    "Invocation failed"
                );
                let message = e.to_string();
                inv.deliver(&DeliveryPiece::error(message.clone())).await;
                OrchestrationOutcome::failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::RetryPolicy;
    use kbrelay_channels::CollectingSink;
    use kbrelay_providers::{ScriptedAttempt, ScriptedBackend};
    use kbrelay_telemetry::RecordingAnalyticsSink;
    use serde_json::json;

    fn kb_trace(uris: &[&str]) -> serde_json::Value {
        let refs: Vec<_> = uris
            .iter()
            .map(|u| json!({"location": {"type": "S3", "s3Location": {"uri": u}}}))
            .collect();
        json!({"trace": {"orchestrationTrace": {"observation": {
            "knowledgeBaseLookupOutput": {"retrievedReferences": refs}
        }}}})
    }

    fn orchestrator(
        attempts: Vec<ScriptedAttempt>,
        settings: OrchestratorSettings,
    ) -> (Orchestrator, Arc<ScriptedBackend>, Arc<RecordingAnalyticsSink>) {
        let backend = Arc::new(ScriptedBackend::new(attempts));
        let analytics = Arc::new(RecordingAnalyticsSink::new());
        let gateway = AgentGateway::new(backend.clone(), RetryPolicy::immediate(2));
        let orch = Orchestrator::new(gateway, analytics.clone(), settings);
        (orch, backend, analytics)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("What is ALGEE?", Some("sess-9"), Some("learner")).unwrap()
    }

    #[tokio::test]
    async fn streams_chunks_then_completes() {
        let events = vec![
            Ok(BackendEvent::text("Hello there. How are you today? I am fine.")),
            Ok(BackendEvent::trace(kb_trace(&["s3://bucket/doc1.pdf"]))),
            Ok(BackendEvent::trace(kb_trace(&[
                "s3://bucket/doc1.pdf",
                "s3://bucket/doc2.pdf",
            ]))),
        ];
        let (orch, _, analytics) =
            orchestrator(vec![ScriptedAttempt::Events(events)], Default::default());
        let sink = CollectingSink::new();

        let outcome = orch.run(&request(), &sink).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.phase, Phase::Done);
        assert_eq!(
            sink.chunks(),
            vec!["Hello there. ", "How are you today? ", "I am fine."]
        );

        let result = outcome.result().unwrap();
        assert_eq!(result.full_text, "Hello there. How are you today? I am fine.");
        assert_eq!(result.citations.len(), 2);
        assert_eq!(result.citations[0].references[0].title, "doc1.pdf");
        assert_eq!(result.citations[1].references[0].title, "doc2.pdf");

        let pieces = sink.pieces();
        match pieces.last() {
            Some(DeliveryPiece::Complete { result: delivered }) => {
                assert_eq!(delivered, result)
            }
            other => panic!("expected complete piece, got {other:?}"),
        }

        // Analytics dispatch is synchronous for the recording sink
        let records = analytics.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, "sess-9");
        assert_eq!(records[0].query, "What is ALGEE?");
        assert_eq!(records[0].user_role, "learner");
        assert_eq!(records[0].response, result.full_text);
    }

    #[tokio::test]
    async fn retry_then_success() {
        let (orch, backend, _) = orchestrator(
            vec![
                ScriptedAttempt::Fail(BackendError::Network("reset".into())),
                ScriptedAttempt::Events(vec![Ok(BackendEvent::text("Fine. Thanks."))]),
            ],
            Default::default(),
        );
        let sink = CollectingSink::new();

        let outcome = orch.run(&request(), &sink).await;
        assert!(outcome.is_success());
        assert_eq!(backend.call_count(), 2);
        assert_eq!(sink.chunks(), vec!["Fine. ", "Thanks."]);
    }

    #[tokio::test]
    async fn budget_exhausted_delivers_no_chunks() {
        let (orch, backend, analytics) = orchestrator(
            vec![
                ScriptedAttempt::Fail(BackendError::Network("reset".into())),
                ScriptedAttempt::Fail(BackendError::RateLimited {
                    retry_after_secs: 1,
                }),
            ],
            Default::default(),
        );
        let sink = CollectingSink::new();

        let outcome = orch.run(&request(), &sink).await;

        assert_eq!(outcome.status_code, 500);
        assert_eq!(outcome.phase, Phase::Errored);
        assert_eq!(backend.call_count(), 2);
        assert!(sink.chunks().is_empty());
        assert!(matches!(sink.pieces()[..], [DeliveryPiece::Error { .. }]));
        assert!(analytics.records().is_empty());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["statusCode"], 500);
        assert!(json["body"]["error"].as_str().unwrap().contains("Rate limited"));
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_sent_chunks() {
        let events = vec![
            Ok(BackendEvent::text("One. Two.")),
            Err(BackendError::StreamInterrupted("connection reset".into())),
        ];
        let (orch, backend, _) =
            orchestrator(vec![ScriptedAttempt::Events(events)], Default::default());
        let sink = CollectingSink::new();

        let outcome = orch.run(&request(), &sink).await;

        assert!(!outcome.is_success());
        assert_eq!(backend.call_count(), 1);
        let kinds: Vec<_> = sink.pieces().iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, vec!["chunk", "chunk", "error"]);
    }

    #[tokio::test]
    async fn delivery_failures_do_not_abort() {
        let (orch, _, _) = orchestrator(
            vec![ScriptedAttempt::Events(vec![Ok(BackendEvent::text(
                "A. B. C.",
            ))])],
            Default::default(),
        );
        let sink = CollectingSink::failing_on(&[1]);

        let outcome = orch.run(&request(), &sink).await;

        assert!(outcome.is_success());
        assert_eq!(sink.chunks(), vec!["A. ", "C."]);
        assert_eq!(outcome.result().unwrap().full_text, "A. B. C.");
    }

    #[tokio::test]
    async fn attribution_citations_are_collected() {
        let attribution = json!({"citations": [{
            "generatedResponsePart": {"textResponsePart": {"text": "ALGEE"}},
            "retrievedReferences": [{
                "location": {"type": "S3", "s3Location": {"uri": "s3://kb/m.pdf"}},
                "metadata": {"x-amz-bedrock-kb-source-uri": "s3://kb/Manual.pdf"}
            }]
        }]});
        let events = vec![
            Ok(BackendEvent::text("ALGEE is an action plan.").with_attribution(attribution)),
            Ok(BackendEvent::trace(kb_trace(&["s3://kb/m.pdf"]))),
        ];
        let (orch, _, _) =
            orchestrator(vec![ScriptedAttempt::Events(events)], Default::default());

        let outcome = orch.run(&request(), &kbrelay_core::NullSink).await;
        let citations = &outcome.result().unwrap().citations;
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].text, "ALGEE");
        assert_eq!(citations[0].references[0].title, "Manual.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_hits_idle_timeout() {
        let settings = OrchestratorSettings {
            event_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let (orch, _, _) = orchestrator(
            vec![ScriptedAttempt::Stall(vec![Ok(BackendEvent::text(
                "Partial answer. Still going.",
            ))])],
            settings,
        );
        let sink = CollectingSink::new();

        let outcome = orch.run(&request(), &sink).await;

        assert_eq!(outcome.phase, Phase::Errored);
        assert_eq!(sink.chunks().len(), 2);
        match sink.pieces().last() {
            Some(DeliveryPiece::Error { error }) => assert!(error.contains("timed out")),
            other => panic!("expected error piece, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_cancels_run() {
        let settings = OrchestratorSettings {
            event_timeout: None,
            ..Default::default()
        };
        let (orch, _, analytics) = orchestrator(
            vec![ScriptedAttempt::Stall(vec![Ok(BackendEvent::text("Hi."))])],
            settings,
        );
        let sink = CollectingSink::new();

        let outcome = orch
            .run_with_deadline(&request(), &sink, Duration::from_secs(30))
            .await;

        assert_eq!(outcome.status_code, 500);
        assert!(analytics.records().is_empty());
        assert_eq!(sink.pieces().last().map(|p| p.kind()), Some("error"));
    }

    #[tokio::test]
    async fn empty_stream_completes_with_empty_result() {
        let (orch, _, analytics) =
            orchestrator(vec![ScriptedAttempt::Events(vec![])], Default::default());
        let sink = CollectingSink::new();

        let outcome = orch.run(&request(), &sink).await;

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["body"]["responsetext"], "");
        assert_eq!(json["body"]["citations"], json!([]));
        assert_eq!(sink.pieces().len(), 1);
        assert_eq!(analytics.records().len(), 1);
    }
}
