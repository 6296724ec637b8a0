//! HTTP agent-runtime backend.
//!
//! Invokes a hosted agent over HTTP and reads its answer as a line-oriented
//! event stream. Each line is one JSON record in the agent-runtime shape,
//! optionally prefixed with `data: ` as in SSE:
//!
//! ```text
//! {"chunk":{"bytes":"SGVsbG8u","attribution":{"citations":[...]}}}
//! {"trace":{"trace":{"orchestrationTrace":{"observation":{...}}}}}
//! ```
//!
//! Chunk bytes are base64-encoded UTF-8.

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use kbrelay_core::backend::{EventStream, GenerationBackend, InvocationInput};
use kbrelay_core::error::BackendError;
use kbrelay_core::event::{BackendEvent, ChunkPart};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A generation backend reached over HTTP.
pub struct HttpAgentBackend {
    base_url: reqwest::Url,
    agent_id: String,
    agent_alias_id: String,
    api_key: Option<String>,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl HttpAgentBackend {
    /// Create a backend for one agent alias.
    pub fn new(
        base_url: &str,
        agent_id: impl Into<String>,
        agent_alias_id: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| BackendError::NotConfigured(format!("invalid base URL: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            agent_id: agent_id.into(),
            agent_alias_id: agent_alias_id.into(),
            api_key,
            request_timeout,
            client,
        })
    }

    /// Build from the `[backend]` config section.
    pub fn from_config(config: &kbrelay_config::BackendConfig) -> Result<Self, BackendError> {
        Self::new(
            &config.base_url,
            &config.agent_id,
            &config.agent_alias_id,
            config.api_key.clone(),
            config.request_timeout(),
        )
    }

    /// `{base}/agents/{agent}/agentAliases/{alias}/sessions/{session}/text`
    fn invoke_url(&self, session_id: &str) -> Result<reqwest::Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::NotConfigured("base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend([
                "agents",
                &self.agent_id,
                "agentAliases",
                &self.agent_alias_id,
                "sessions",
                session_id,
                "text",
            ]);
        Ok(url)
    }

    /// `{base}/health`
    fn health_url(&self) -> Result<reqwest::Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::NotConfigured("base URL cannot be a base".into()))?
            .pop_if_empty()
            .push("health");
        Ok(url)
    }
}

#[async_trait]
impl GenerationBackend for HttpAgentBackend {
    fn name(&self) -> &str {
        "agent-runtime"
    }

    async fn invoke(&self, input: InvocationInput) -> Result<EventStream, BackendError> {
        let url = self.invoke_url(&input.session_id)?;

        debug!(
            session_id = %input.session_id,
            agent_id = %self.agent_id,
            "Invoking agent"
        );

        let mut request = self
            .client
            .post(url)
            .header("Accept", "application/x-ndjson, text/event-stream")
            .json(&input);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        // The timeout covers the response head only; the body is paced by
        // the agent and guarded by the orchestrator's idle timeout.
        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| {
                BackendError::Timeout(format!(
                    "no response after {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(BackendError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(BackendError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Agent invocation rejected");
            return Err(BackendError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Read the body and forward one event per line
        tokio::spawn(forward_lines(response.bytes_stream(), tx));

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        let response = self
            .client
            .get(self.health_url()?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Split a byte stream into lines and forward one event per record.
///
/// Stops at `[DONE]`, at the first undecodable record, or when the receiver
/// goes away. A final record without a trailing newline is handled like any
/// other.
async fn forward_lines<S, B, E>(
    byte_stream: S,
    tx: tokio::sync::mpsc::Sender<Result<BackendEvent, BackendError>>,
) where
    S: futures::Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(BackendError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(bytes.as_ref());

        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=line_end).collect();
            if !forward_line(&line, &tx).await {
                return;
            }
        }
    }

    forward_line(&buffer, &tx).await;
}

/// Forward one line. Returns `false` once reading should stop.
async fn forward_line(
    line: &[u8],
    tx: &tokio::sync::mpsc::Sender<Result<BackendEvent, BackendError>>,
) -> bool {
    match parse_line(line) {
        LineOutcome::Event(event) => tx.send(Ok(event)).await.is_ok(),
        LineOutcome::Skip => true,
        LineOutcome::Done => false,
        LineOutcome::Failed(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

// --- Wire format ---

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    chunk: Option<WireChunk>,
    #[serde(default)]
    trace: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    /// Base64 of the UTF-8 text.
    #[serde(default)]
    bytes: Option<String>,
    #[serde(default)]
    attribution: Option<serde_json::Value>,
}

#[derive(Debug)]
enum LineOutcome {
    Event(BackendEvent),
    Skip,
    Done,
    Failed(BackendError),
}

fn parse_line(raw: &[u8]) -> LineOutcome {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();

    // Blank lines and SSE comments
    if line.is_empty() || line.starts_with(':') {
        return LineOutcome::Skip;
    }

    let data = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if data == "[DONE]" {
        return LineOutcome::Done;
    }

    let wire: WireEvent = match serde_json::from_str(data) {
        Ok(w) => w,
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable event line");
            return LineOutcome::Skip;
        }
    };

    match decode_event(wire) {
        Ok(event) => LineOutcome::Event(event),
        Err(e) => LineOutcome::Failed(e),
    }
}

fn decode_event(wire: WireEvent) -> Result<BackendEvent, BackendError> {
    let chunk = match wire.chunk {
        Some(chunk) => {
            let text = match chunk.bytes {
                Some(encoded) => Some(decode_bytes(&encoded)?),
                None => None,
            };
            Some(ChunkPart {
                text,
                attribution: chunk.attribution,
            })
        }
        None => None,
    };

    Ok(BackendEvent {
        chunk,
        trace: wire.trace,
    })
}

fn decode_bytes(encoded: &str) -> Result<String, BackendError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| BackendError::MalformedEvent(format!("chunk bytes not base64: {e}")))?;
    String::from_utf8(raw)
        .map_err(|e| BackendError::MalformedEvent(format!("chunk bytes not UTF-8: {e}")))
}
