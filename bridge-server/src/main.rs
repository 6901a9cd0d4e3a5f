use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wled_bridge::prelude::*;

mod routes;

const DEFAULT_FILTER: &str = "bridge_server=debug,wled_bridge=debug,tower_http=debug";

/// HTTP bridge that drives a WLED controller over a serial line
#[derive(Debug, Parser)]
#[command(version)]
#[command(group(ArgGroup::new("mode").required(true).args(["list", "port"])))]
struct Cli {
    /// Print the available serial ports and exit
    #[arg(long)]
    list: bool,
    /// Serial device the controller is attached to, e.g. /dev/ttyUSB0
    #[arg(long, value_name = "PATH")]
    port: Option<String>,
    /// RON config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Listen address, overrides the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    if cli.list {
        let ports = list_ports()?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            let details = [port.manufacturer, port.product, port.vendor_id, port.product_id]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            println!("{}\t{}\t{}", port.path, port.port_type, details);
        }
        return Ok(());
    }

    // clap guarantees one of the two modes
    let Some(port) = cli.port else {
        return Ok(());
    };

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    let bind = cli.bind.unwrap_or_else(|| config.bind.clone());

    info!(
        "Using serial port {} at {} baud, revert policy {:?}",
        port, config.baud_rate, config.revert_policy
    );

    let transport = Arc::new(SerialTransport::new(port, config.baud_rate));
    let app = routes::router(routes::AppState::new(transport, config.revert_policy));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    info!("Server is running on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down, pending reverts are dropped");
        })
        .await?;

    Ok(())
}
