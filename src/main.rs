use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quire::config::{Cli, Command, Config};
use quire::state::AppState;
use quire::{db, routes, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    let blobs = storage::from_config(&config.storage)?;
    let state = AppState::new(pool, config.clone(), blobs);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state, &config).await,
        Command::Sweep {
            dry_run,
            grace_minutes,
        } => {
            let grace = Duration::from_secs(grace_minutes.saturating_mul(60));
            let report = state.posts.sweep(grace, dry_run).await?;
            tracing::info!(
                dry_run = report.dry_run,
                scanned = report.scanned,
                deleted = report.deleted.len(),
                skipped_recent = report.skipped_recent,
                failed = report.failed.len(),
                unmaterialized = report.unmaterialized.len(),
                "Sweep complete"
            );
            if !report.failed.is_empty() {
                anyhow::bail!("{} orphaned blobs could not be deleted", report.failed.len());
            }
            Ok(())
        }
    }
}

async fn serve(state: AppState, config: &Config) -> anyhow::Result<()> {
    let app = routes::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
