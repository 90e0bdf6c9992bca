use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use haven_gateway::{app, bootstrap};
use haven_storage::{SqliteBlobs, SqliteKv};

#[derive(Parser)]
#[command(name = "haven-gateway", about = "Conversational support gateway")]
struct Args {
    /// Path to haven.toml (defaults to HAVEN_CONFIG or ~/.haven/haven.toml).
    #[arg(long)]
    config: Option<String>,
    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haven_gateway=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = haven_core::config::HavenConfig::load(args.config.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("config load failed ({e}), using defaults");
            haven_core::config::HavenConfig::default()
        });
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let kv = Arc::new(SqliteKv::new(rusqlite::Connection::open(
        &config.database.path,
    )?)?);
    let blob = Arc::new(SqliteBlobs::new(rusqlite::Connection::open(
        &config.database.path,
    )?)?);

    let (primary, fallback, summary) = bootstrap::build_providers(&config);
    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = bootstrap::build_state(config, kv, blob, primary, fallback, summary);

    // Background loops share one shutdown signal.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(state.sessions.clone().run_sweeper(60, shutdown_rx.clone()));
    tokio::spawn(state.alerts.clone().run(15, shutdown_rx.clone()));
    tokio::spawn(haven_monitor::metrics::run_snapshot_loop(
        state.metrics.clone(),
        state.kv.clone(),
        shutdown_rx.clone(),
    ));

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("haven gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
