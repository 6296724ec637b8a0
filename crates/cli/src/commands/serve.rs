//! `kbrelay serve`: Start the gateway.

use kbrelay_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("kbrelay gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Backend:   {}", config.backend.base_url);
    println!("   Routes:    POST /v1/chat, POST /v1/chat/stream, GET /v1/ws");

    kbrelay_gateway::start(config).await?;

    Ok(())
}
