//! `kbrelay ask`: One query, answer streamed to the terminal.

use kbrelay_channels::StdoutSink;
use kbrelay_config::AppConfig;
use kbrelay_core::request::GenerationRequest;
use tracing::debug;

pub async fn run(
    config: AppConfig,
    query: &str,
    role: Option<&str>,
    session: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = GenerationRequest::new(query, session, role)?;

    debug!(session_id = %request.session_id(), role = %request.role(), "Asking");

    let backend = kbrelay_providers::build_from_config(&config)?;
    let analytics = kbrelay_telemetry::build_from_config(&config.analytics);
    let orchestrator = kbrelay_agent::build_from_config(&config, backend, analytics);

    let outcome = orchestrator.run(&request, &StdoutSink::new()).await;
    if !outcome.is_success() {
        return Err(format!("query failed (session {})", request.session_id()).into());
    }

    eprintln!("\nsession: {}", request.session_id());
    Ok(())
}
