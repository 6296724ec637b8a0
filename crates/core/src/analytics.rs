//! Analytics hand-off: the fire-and-forget record of each answered query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the analytics collaborator receives once per successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub session_id: String,
    pub query: String,
    pub response: String,
    pub user_role: String,
    pub timestamp: DateTime<Utc>,
}

/// The analytics collaborator.
///
/// `dispatch` must return promptly: implementations hand the record to a
/// background task and never report its outcome to the caller.
pub trait AnalyticsSink: Send + Sync {
    fn name(&self) -> &str;

    fn dispatch(&self, record: AnalyticsRecord);
}
