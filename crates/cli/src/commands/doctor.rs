//! `kbrelay doctor`: Diagnose configuration and backend health.

use kbrelay_config::{AppConfig, ConfigError};
use std::path::Path;

pub async fn run(
    config_path: &Path,
    config: Result<AppConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 kbrelay Doctor");
    println!("=================\n");

    let mut issues = 0;

    if config_path.exists() {
        println!("  ✅ Config file: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file at {}, run `kbrelay init`", config_path.display());
        issues += 1;
    }

    let config = match config {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config file before running other checks.");
            return Ok(());
        }
    };

    println!("\n  Resolved configuration:");
    println!("    {:?}", config.backend);
    println!("    {:?}", config.orchestrator);
    println!("    {:?}", config.delivery);
    println!("    {:?}", config.analytics);
    println!();

    if config.backend.api_key.is_some() {
        println!("  ✅ Backend API key configured");
    } else {
        println!("  ℹ️  No backend API key (fine for unauthenticated backends)");
    }

    match kbrelay_providers::build_from_config(&config) {
        Ok(backend) => match backend.health_check().await {
            Ok(true) => println!("  ✅ Backend reachable: {}", config.backend.base_url),
            Ok(false) => {
                println!("  ❌ Backend unhealthy: {}", config.backend.base_url);
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Backend unreachable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Backend misconfigured: {e}");
            issues += 1;
        }
    }

    if config.analytics.enabled && config.analytics.endpoint.is_none() {
        println!("  ℹ️  Analytics records go to the log (no analytics.endpoint)");
    }
    if config.delivery.connection_endpoint.is_some() {
        println!("  ✅ Callback delivery enabled");
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
