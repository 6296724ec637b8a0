//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`        : run one query, return `{responsetext, citations}`
//! - `POST /v1/chat/stream` : run one query, stream pieces as SSE
//! - `GET  /v1/ws`          : WebSocket; `{"action":"sendMessage", ...}` frames

use axum::{
    Router,
    extract::State,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use kbrelay_agent::OutcomeBody;
use kbrelay_channels::EventStreamSink;
use kbrelay_core::channel::DeliveryPiece;
use kbrelay_core::error::Error;
use kbrelay_core::request::GenerationRequest;

use crate::SharedState;

/// Build the v1 router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

// --- Request / response types ---

/// Body of `POST /v1/chat` and `POST /v1/chat/stream`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub querytext: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    /// Also push pieces to this connection.
    #[serde(default, alias = "connectionId")]
    pub connection_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: Error) -> ApiError {
    let message = match error {
        Error::InvalidRequest(message) => message,
        other => other.to_string(),
    };
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message }))
}

fn parse_request(payload: &ChatRequest) -> Result<GenerationRequest, ApiError> {
    GenerationRequest::new(
        &payload.querytext,
        payload.session_id.as_deref(),
        payload.user_role.as_deref(),
    )
    .map_err(bad_request)
}

// --- Synchronous chat ---

/// `POST /v1/chat`: run to completion and return the final result.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<(StatusCode, Json<OutcomeBody>), ApiError> {
    let request = parse_request(&payload)?;
    info!(session_id = %request.session_id(), "v1/chat request");

    let outcome = match payload.connection_id.as_deref() {
        Some(connection_id) => {
            let sink = state.connection_sink(connection_id);
            state.orchestrator.run(&request, sink.as_ref()).await
        }
        None => {
            state
                .orchestrator
                .run(&request, &kbrelay_core::NullSink)
                .await
        }
    };

    let status =
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(outcome.body)))
}

// --- SSE streaming ---

/// `POST /v1/chat/stream`: stream pieces as SSE events named by kind.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let request = parse_request(&payload)?;
    info!(session_id = %request.session_id(), "v1/chat/stream SSE request");

    let (sink, rx) = EventStreamSink::channel(64);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.run(&request, &sink).await;
        debug!(status = outcome.status_code, "SSE orchestration finished");
    });

    let stream = ReceiverStream::new(rx).map(|piece| {
        let data = piece.to_json().unwrap_or_default();
        Ok(SseEvent::default().event(piece.kind()).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// --- WebSocket ---

/// `GET /v1/ws`: one registered connection per socket.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Frame sent by the client.
#[derive(Debug, Deserialize)]
pub struct WsClientMessage {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub querytext: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
}

async fn handle_ws_connection(socket: WebSocket, state: SharedState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let mut outbound = state.connections.register(&connection_id).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Registered queue -> socket
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break; // client disconnected
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue, // ignore binary, ping, pong
            Err(_) => break,
        };
        handle_client_frame(&state, &connection_id, &text).await;
    }

    state.connections.unregister(&connection_id).await;
    writer.abort();
}

/// Handle one client frame. Replies go to the connection's queue; a valid
/// `sendMessage` starts an orchestration in the background.
pub async fn handle_client_frame(state: &SharedState, connection_id: &str, text: &str) {
    let reply_error = |message: String| async move {
        let piece = DeliveryPiece::error(message);
        let result = match piece.to_json() {
            Ok(json) => state.connections.push(connection_id, json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(connection_id = %connection_id, error = %e, "Failed to send error frame");
        }
    };

    let message: WsClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            reply_error(format!("Invalid message: {e}")).await;
            return;
        }
    };

    if message.action != "sendMessage" {
        reply_error("Unknown route".into()).await;
        return;
    }

    let request = match GenerationRequest::new(
        &message.querytext,
        message.session_id.as_deref(),
        message.user_role.as_deref(),
    ) {
        Ok(r) => r,
        Err(_) => {
            reply_error("Empty query received".into()).await;
            return;
        }
    };

    info!(
        connection_id = %connection_id,
        session_id = %request.session_id(),
        location = ?message.location,
        "WebSocket query received"
    );

    let sink = state.connection_sink(connection_id);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.run(&request, sink.as_ref()).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use kbrelay_agent::{AgentGateway, Orchestrator, OrchestratorSettings, RetryPolicy};
    use kbrelay_channels::ConnectionRegistry;
    use kbrelay_core::error::BackendError;
    use kbrelay_core::event::BackendEvent;
    use kbrelay_providers::{ScriptedAttempt, ScriptedBackend};
    use kbrelay_telemetry::RecordingAnalyticsSink;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state_with(attempts: Vec<ScriptedAttempt>) -> (SharedState, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(attempts));
        let gateway = AgentGateway::new(backend.clone(), RetryPolicy::immediate(2));
        let orchestrator = Orchestrator::new(
            gateway,
            Arc::new(RecordingAnalyticsSink::new()),
            OrchestratorSettings::default(),
        );
        let state = GatewayState::new(orchestrator, Arc::new(ConnectionRegistry::default()));
        (Arc::new(state), backend)
    }

    fn answer(text: &str) -> Vec<ScriptedAttempt> {
        vec![ScriptedAttempt::Events(vec![Ok(BackendEvent::text(text))])]
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_final_result() {
        let (state, _) = state_with(answer("Hello there. How are you?"));
        let app = v1_router(state);

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"querytext": "hi", "user_role": "staff"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["responsetext"], "Hello there. How are you?");
        assert_eq!(json["citations"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn chat_empty_query_is_400_without_backend_call() {
        let (state, backend) = state_with(answer("unused"));
        let app = v1_router(state);

        let response = app
            .oneshot(post_json("/chat", serde_json::json!({"querytext": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Query text is required");
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn chat_backend_failure_is_500() {
        let (state, _) = state_with(vec![
            ScriptedAttempt::Fail(BackendError::Network("down".into())),
            ScriptedAttempt::Fail(BackendError::Network("still down".into())),
        ]);
        let app = v1_router(state);

        let response = app
            .oneshot(post_json("/chat", serde_json::json!({"querytext": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("still down"));
    }

    #[tokio::test]
    async fn chat_pushes_to_registered_connection() {
        let (state, _) = state_with(answer("One. Two."));
        let mut rx = state.connections.register("conn-1").await;
        let app = v1_router(state);

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"querytext": "hi", "connectionId": "conn-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut kinds = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
            kinds.push(json["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["chunk", "chunk", "complete"]);
    }

    #[tokio::test]
    async fn chat_with_synthetic_connection_still_succeeds() {
        let (state, _) = state_with(answer("Fine."));
        let app = v1_router(state);

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({"querytext": "hi", "connection_id": "mock-abc"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_stream_returns_sse() {
        let (state, _) = state_with(answer("Hello there. How are you today? I am fine."));
        let app = v1_router(state);

        let response = app
            .oneshot(post_json("/chat/stream", serde_json::json!({"querytext": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(
            content_type.contains("text/event-stream"),
            "Expected text/event-stream, got '{}'",
            content_type
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert_eq!(text.matches("event: chunk").count(), 3);
        assert!(text.contains("event: complete"));
        assert!(text.contains(r#""responsetext":"Hello there. How are you today? I am fine.""#));
    }

    #[tokio::test]
    async fn chat_stream_reports_failure_as_error_event() {
        let (state, _) = state_with(vec![
            ScriptedAttempt::Fail(BackendError::Timeout("slow".into())),
            ScriptedAttempt::Fail(BackendError::Timeout("slow".into())),
        ]);
        let app = v1_router(state);

        let response = app
            .oneshot(post_json("/chat/stream", serde_json::json!({"querytext": "hi"})))
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("event: error"));
        assert!(!text.contains("event: chunk"));
    }

    #[tokio::test]
    async fn chat_stream_empty_query_is_400() {
        let (state, _) = state_with(vec![]);
        let app = v1_router(state);

        let response = app
            .oneshot(post_json("/chat/stream", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Query text is required");
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let (state, _) = state_with(vec![]);
        let app = v1_router(state);

        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        // Without upgrade headers axum rejects the request, but the route is there
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    async fn next_frame(rx: &mut tokio::sync::mpsc::Receiver<String>) -> serde_json::Value {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn ws_unknown_action() {
        let (state, _) = state_with(vec![]);
        let mut rx = state.connections.register("c1").await;

        handle_client_frame(&state, "c1", r#"{"action":"dance"}"#).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["error"], "Unknown route");
    }

    #[tokio::test]
    async fn ws_empty_query() {
        let (state, backend) = state_with(vec![]);
        let mut rx = state.connections.register("c1").await;

        handle_client_frame(&state, "c1", r#"{"action":"sendMessage","querytext":"  "}"#).await;
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["error"], "Empty query received");
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn ws_invalid_json() {
        let (state, _) = state_with(vec![]);
        let mut rx = state.connections.register("c1").await;

        handle_client_frame(&state, "c1", "not json").await;
        let frame = next_frame(&mut rx).await;
        assert!(frame["error"].as_str().unwrap().starts_with("Invalid message"));
    }

    #[tokio::test]
    async fn ws_send_message_streams_to_connection() {
        let (state, backend) = state_with(answer("First. Second."));
        let mut rx = state.connections.register("c1").await;

        handle_client_frame(
            &state,
            "c1",
            r#"{"action":"sendMessage","querytext":"What is MHFA?","session_id":"s-1","user_role":"instructor","location":{"lat":1.0}}"#,
        )
        .await;

        assert_eq!(next_frame(&mut rx).await["chunk"], "First. ");
        assert_eq!(next_frame(&mut rx).await["chunk"], "Second.");
        let complete = next_frame(&mut rx).await;
        assert_eq!(complete["type"], "complete");
        assert_eq!(complete["responsetext"], "First. Second.");

        let input = &backend.inputs()[0];
        assert_eq!(input.session_id, "s-1");
        assert_eq!(input.session_attributes.user_role, "instructor");
    }
}
