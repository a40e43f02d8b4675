//! Periscope Host
//!
//! Desktop host that attaches to remote app processes and routes debug
//! messages between them and independently-loaded plugins.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use periscope::config::HostConfig;
use periscope::manager::PluginManager;
use periscope::server::{AppState, create_router};
use periscope::store::HostStore;

/// Periscope Debug Host
#[derive(Parser, Debug)]
#[command(name = "periscope")]
#[command(about = "Periscope Debug Host", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host address (overrides configuration)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides configuration)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("periscope=info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args = Args::parse();

    let mut config = HostConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("Starting Periscope host v{}", env!("CARGO_PKG_VERSION"));

    // Create core components
    let store = HostStore::new(config.clone());
    let manager = PluginManager::new(store.clone());
    let state = AppState::new(store.clone(), manager.clone());

    // Create router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("App connection endpoint: ws://{}/ws", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(store, manager))
        .await?;

    info!("Host shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal, then tear the host down
async fn shutdown_signal(store: HostStore, manager: PluginManager) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    // Let in-flight lifecycle commands finish before tearing down.
    if tokio::time::timeout(Duration::from_secs(10), manager.wait_idle())
        .await
        .is_err()
    {
        warn!("Plugin command queue did not drain within timeout");
    }
    store.shutdown().await;
}
