//! screen-config: command-line front end for the screen document engine.
//!
//! Resolves screens through the same cache tiers an embedded client uses,
//! which makes it handy for warming or inspecting a cache directory.

use clap::Parser;
use tokio::runtime::Handle;
use tracing::info;

use screen_config_cache::config::{Cli, Command, Config};
use screen_config_cache::runtime::WorkerPool;
use screen_config_cache::ScreenConfigEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging. Logs go to stderr; documents to stdout.
    let filter = if cli.verbose {
        "screen_config_cache=debug,screen_config=debug"
    } else {
        "screen_config_cache=info,screen_config=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("screen-config v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        base_url = %config.network.base_url,
        policy = ?config.cache.policy,
        disk_path = %config.cache.disk_path.display(),
        "Configuration loaded"
    );

    let engine = ScreenConfigEngine::builder(config)
        .pool(WorkerPool::from_handle(Handle::current()))
        .build()
        .await?;

    match cli.command {
        Command::Resolve { screen, policy } => {
            let policy = policy.unwrap_or(engine.policy());
            let resolved = engine.resolve_with(screen.as_str(), policy).await?;
            info!(
                screen = %screen,
                provenance = %resolved.provenance,
                stale = resolved.stale,
                bytes = resolved.document.len(),
                "Resolved"
            );
            println!("{}", resolved.document);
        }
        Command::Stats => {
            let stats = engine.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Invalidate { screen } => {
            engine.invalidate(screen.as_str()).await;
            info!(screen = %screen, "Invalidated");
        }
        Command::Clear => {
            engine.clear_all().await;
        }
        Command::Sweep => {
            let deleted = engine.sweep_expired().await;
            info!(deleted, "Sweep complete");
        }
    }

    // Let queued disk writes land before exiting.
    engine.flush().await;
    Ok(())
}
