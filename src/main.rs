use anyhow::Context;
use std::net::{IpAddr, SocketAddr};
use tracing::{error, info};

use peercall::config::validate_relay_env;
use peercall::relay::RelayServer;
use peercall::{logging, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match validate_relay_env() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!(error = %e, "Invalid relay configuration");
            return Err(e).context("relay configuration");
        }
    };
    logging::init(&config.rust_log);
    metrics::register_metrics();

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("RELAY_HOST '{}' is not an IP address", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let relay = RelayServer::new(config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received, shutting down");
    };

    let (bound, server) = relay
        .bind(addr, shutdown)
        .with_context(|| format!("failed to bind relay on {}", addr))?;
    info!(addr = %bound, "Signaling relay listening");

    server.await;
    info!("Signaling relay stopped");
    Ok(())
}
