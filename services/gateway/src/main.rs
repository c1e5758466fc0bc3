mod error;
mod handlers;
mod router;
mod state;

use clap::Parser;
use market_sync::{SyncConfig, SyncRuntime};
use router::create_router;
use state::AppState;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP surface for the market sync service", long_about = None)]
struct Args {
    /// Address to serve the API on
    #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Tracing filter directives
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,

    /// Do not connect to the upstream feeds on startup
    #[arg(long)]
    no_connect: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter)?)
        .init();

    tracing::info!(version = market_sync::SERVICE_VERSION, "Starting Gateway API service");

    let config = SyncConfig::from_env();
    tracing::info!(
        snapshot_url = %config.snapshot_url,
        push_url = %config.push_url,
        "Sync configuration loaded"
    );

    let sync = SyncRuntime::spawn_http(config)?;
    if !args.no_connect {
        sync.connect().await?;
    }

    let app = create_router(AppState::new(sync.clone()));

    let listener = TcpListener::bind(args.bind).await?;
    tracing::info!("Listening on {}", args.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    sync.shutdown().await?;
    tracing::info!("Gateway stopped");
    Ok(())
}
