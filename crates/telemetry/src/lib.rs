//! Analytics hand-off for kbrelay.
//!
//! Each completed answer produces one `AnalyticsRecord`. Where it goes is a
//! deployment choice: a downstream HTTP classifier, the log, or nowhere.

pub mod sinks;

pub use sinks::{DisabledAnalyticsSink, HttpAnalyticsSink, LogAnalyticsSink, RecordingAnalyticsSink};

use kbrelay_core::analytics::AnalyticsSink;
use std::sync::Arc;

/// Pick the analytics sink for the `[analytics]` config section.
pub fn build_from_config(config: &kbrelay_config::AnalyticsConfig) -> Arc<dyn AnalyticsSink> {
    match (config.enabled, config.endpoint.as_deref()) {
        (false, _) => Arc::new(DisabledAnalyticsSink),
        (true, Some(endpoint)) if !endpoint.trim().is_empty() => {
            Arc::new(HttpAnalyticsSink::new(endpoint.trim()))
        }
        (true, _) => Arc::new(LogAnalyticsSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbrelay_config::AnalyticsConfig;

    #[test]
    fn sink_selection() {
        let mut config = AnalyticsConfig::default();
        assert_eq!(build_from_config(&config).name(), "log");

        config.endpoint = Some("https://analytics.example.com/classify".into());
        assert_eq!(build_from_config(&config).name(), "http");

        config.enabled = false;
        assert_eq!(build_from_config(&config).name(), "disabled");
    }
}
