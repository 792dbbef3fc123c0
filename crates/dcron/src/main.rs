use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dcron::{config::Config, service};

/// Distributed cron service.
#[derive(Parser)]
#[command(name = "dcron", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "conf/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the service (default when no subcommand is given).
    Serve,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e:#}");
            std::process::exit(1);
        }
    };

    match cli.command {
        None | Some(Command::Serve) => {
            if let Err(e) = service::run(config).await {
                tracing::error!(error = %e, "service exited with error");
                std::process::exit(1);
            }
        }
    }
}
