//! Main entry point for the kline-backfill CLI

use clap::Parser;
use kline_backfill::cli::{validate, Cli, Commands};
use kline_backfill::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kline_backfill=info"));

    // Logs go to stderr so JSON summaries on stdout stay parseable
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - stopping at the next chunk boundary...");
                shutdown.request_shutdown();
            }
        }
    });

    let result = match &cli.command {
        Commands::Fetch(args) => args
            .execute(cli.output_format, shutdown.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Validate(args) => args
            .execute(cli.output_format)
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Intervals => {
            validate::list_intervals(cli.output_format);
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
