//! Trino Gateway
//!
//! Query router in front of a fleet of Trino clusters.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                     GATEWAY                          │
//!                    │                                                      │
//!  Client Request    │  ┌─────────┐    ┌────────────┐    ┌──────────────┐   │
//!  ──────────────────┼─▶│  http   │───▶│ dispatcher │───▶│   affinity   │   │
//!                    │  │ server  │    │            │    │   tracker    │   │
//!                    │  └─────────┘    └─────┬──────┘    └──────────────┘   │
//!                    │                       │ miss                         │
//!                    │                       ▼                              │
//!                    │               ┌──────────────┐   ┌──────────────┐    │
//!                    │               │   routing    │──▶│load_balancer │    │
//!                    │               │  resolver    │   │  selector    │    │
//!                    │               └──────────────┘   └──────┬───────┘    │
//!                    │                                         │            │
//!  Client Response   │  ┌─────────┐    ┌────────────┐          ▼            │
//!  ◀─────────────────┼──│response │◀───│  reqwest   │◀──── Backend cluster  │
//!                    │  │ relay   │    │  client    │                       │
//!                    │  └─────────┘    └────────────┘                       │
//!                    │                                                      │
//!                    │  registry ◀── health monitor, admin API, dispatcher  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;

use trino_gateway::config::{load_config, GatewayConfig};
use trino_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use trino_gateway::net::Keystore;
use trino_gateway::observability::{logging, metrics};
use trino_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "trino-gateway")]
#[command(about = "Routes Trino queries across backend clusters", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "trino-gateway starting");
    tracing::info!(
        config = %cli.config.display(),
        port = config.request_router.port,
        ssl = config.request_router.ssl,
        client_certificates = config.request_router.client_ca_path.is_some(),
        backends = config.backends.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(shutdown.clone());

    serve(config, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn serve(config: GatewayConfig, shutdown: &Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.request_router.port));
    let tls = if config.request_router.ssl {
        let path = config
            .request_router
            .keystore_path
            .as_deref()
            .ok_or("ssl requires request_router.keystore_path")?;
        let client_ca = config.request_router.client_ca_path.as_deref().map(Path::new);
        let keystore = Keystore::load(Path::new(path), config.request_router.keystore_pass.as_deref())?;
        Some(keystore.server_config(client_ca)?)
    } else {
        None
    };

    let server = GatewayServer::new(config)?;
    match tls {
        Some(tls) => server.run_tls(addr, tls, shutdown.subscribe()).await?,
        None => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(address = %listener.local_addr()?, "Listening for connections");
            server.run(listener, shutdown.subscribe()).await?;
        }
    }
    Ok(())
}
