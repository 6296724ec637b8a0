//! Analytics sink implementations.
//!
//! `dispatch` never blocks the caller and never reports failure back: the
//! HTTP sink posts from a spawned task and logs what went wrong.

use kbrelay_core::analytics::{AnalyticsRecord, AnalyticsSink};
use kbrelay_core::error::AnalyticsError;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Posts each record as JSON to a downstream classifier endpoint.
pub struct HttpAnalyticsSink {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAnalyticsSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Deliver one record and wait for the answer.
    pub async fn post(&self, record: &AnalyticsRecord) -> Result<(), AnalyticsError> {
        post_record(&self.client, &self.endpoint, self.timeout, record).await
    }
}

async fn post_record(
    client: &reqwest::Client,
    endpoint: &str,
    timeout: Duration,
    record: &AnalyticsRecord,
) -> Result<(), AnalyticsError> {
    let response = client
        .post(endpoint)
        .timeout(timeout)
        .json(record)
        .send()
        .await
        .map_err(|e| AnalyticsError::DispatchFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AnalyticsError::DispatchFailed(format!(
            "endpoint returned {status}"
        )));
    }
    Ok(())
}

impl AnalyticsSink for HttpAnalyticsSink {
    fn name(&self) -> &str {
        "http"
    }

    fn dispatch(&self, record: AnalyticsRecord) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %record.session_id, "No async runtime, analytics record dropped");
            return;
        };

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        runtime.spawn(async move {
            match post_record(&client, &endpoint, timeout, &record).await {
                Ok(()) => debug!(session_id = %record.session_id, "Analytics record delivered"),
                Err(e) => warn!(
                    session_id = %record.session_id,
                    error = %e,
                    "Analytics dispatch failed"
                ),
            }
        });
    }
}

/// Writes each record to the log instead of a downstream service.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnalyticsSink;

impl AnalyticsSink for LogAnalyticsSink {
    fn name(&self) -> &str {
        "log"
    }

    fn dispatch(&self, record: AnalyticsRecord) {
        info!(
            target: "kbrelay::analytics",
            session_id = %record.session_id,
            user_role = %record.user_role,
            timestamp = %record.timestamp.to_rfc3339(),
            query = %record.query,
            response_chars = record.response.chars().count(),
            "Analytics record"
        );
    }
}

/// Drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalyticsSink;

impl AnalyticsSink for DisabledAnalyticsSink {
    fn name(&self) -> &str {
        "disabled"
    }

    fn dispatch(&self, _record: AnalyticsRecord) {}
}

/// Keeps records in memory. Used by tests.
#[derive(Debug, Default)]
pub struct RecordingAnalyticsSink {
    records: Mutex<Vec<AnalyticsRecord>>,
}

impl RecordingAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AnalyticsRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AnalyticsSink for RecordingAnalyticsSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn dispatch(&self, record: AnalyticsRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}
