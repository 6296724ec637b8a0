//! kbrelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`  : Start the HTTP/SSE/WebSocket gateway
//! - `ask`    : Run one query and stream the answer to the terminal
//! - `init`   : Write the default config file
//! - `doctor` : Check configuration and backend reachability

use clap::{Parser, Subcommand};
use kbrelay_config::{AppConfig, ConfigError};
use std::path::{Path, PathBuf};

mod commands;

#[derive(Parser)]
#[command(
    name = "kbrelay",
    about = "kbrelay: streaming answers with citations from a knowledge-base agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (default: ~/.kbrelay/config.toml)
    #[arg(long, global = true, env = "KBRELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask one question and stream the answer
    Ask {
        /// The question
        query: String,

        /// Audience: instructor, staff, learner (default: guest)
        #[arg(short, long)]
        role: Option<String>,

        /// Continue an existing backend session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Diagnose configuration and backend health
    Doctor,
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::config_path);
    let config = load_config(cli.config.as_deref());

    // Initialize tracing. Logs go to stderr so `ask` output stays clean.
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let json = cli.log_json || config.as_ref().is_ok_and(|c| c.logging.json);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(config?, port).await?,
        Commands::Ask {
            query,
            role,
            session,
        } => commands::ask::run(config?, &query, role.as_deref(), session.as_deref()).await?,
        Commands::Init { force } => commands::init::run(&config_path, force)?,
        Commands::Doctor => commands::doctor::run(&config_path, config).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_takes_role_and_session() {
        let cli = Cli::parse_from([
            "kbrelay", "ask", "What is MHFA?", "--role", "staff", "--session", "s-1",
        ]);
        match cli.command {
            Commands::Ask {
                query,
                role,
                session,
            } => {
                assert_eq!(query, "What is MHFA?");
                assert_eq!(role.as_deref(), Some("staff"));
                assert_eq!(session.as_deref(), Some("s-1"));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["kbrelay", "serve", "--port", "9000", "-v", "--log-json"]);
        assert!(cli.verbose);
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }
}
