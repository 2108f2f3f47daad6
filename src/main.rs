use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doghouse::config::{Config, Credentials};
use doghouse::AppState;

#[derive(Parser, Debug)]
#[command(name = "doghouse")]
#[command(author, version, about = "GitHub App authentication gateway for reviewdog", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "doghouse.toml", env = "DOGHOUSE_CONFIG")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Development mode: session cookies without the Secure flag
    #[arg(long, env = "DOGHOUSE_DEV")]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    if cli.dev {
        config.session.dev_mode = true;
    }

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting doghouse v{}", env!("CARGO_PKG_VERSION"));

    // Secrets are required; refuse to start without them
    let credentials = Credentials::from_env(&config.github)?;
    tracing::info!(app_id = credentials.app.app_id, "Loaded GitHub App credentials");
    if config.session.dev_mode {
        tracing::warn!("Development mode: cookies are issued without the Secure flag");
    }

    // Initialize database
    let db = doghouse::db::init(&config.server.data_dir).await?;

    let metrics_handle =
        doghouse::api::metrics::init_metrics().context("Failed to install metrics recorder")?;

    let state = Arc::new(AppState::new(config.clone(), credentials, db)?.with_metrics(metrics_handle));

    let app = doghouse::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
