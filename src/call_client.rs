use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};

use peercall::config::validate_client_env;
use peercall::track_handler::LogSink;
use peercall::{
    logging, metrics, Call, CallConfig, CallError, OutputSinks, WebRtcProvider,
    WebSocketConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match validate_client_env() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!(error = %e, "Invalid client configuration");
            return Err(e).context("client configuration");
        }
    };
    logging::init(&config.rust_log);
    metrics::register_metrics();

    let provider = WebRtcProvider::new().context("failed to set up the media stack")?;
    let sinks = OutputSinks::new(
        Arc::new(LogSink::new("audio")),
        Arc::new(LogSink::new("video")),
    );
    let mut call = Call::new(
        Arc::new(provider),
        Arc::new(WebSocketConnector),
        sinks,
        CallConfig::from(&config),
    );

    match call.start(config.role).await {
        Ok(()) => {}
        Err(CallError::MediaAcquisition(reason)) => {
            eprintln!("Could not access camera or microphone: {}", reason);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("failed to start call"),
    }

    let mut state = call.subscribe();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow();
            info!(state = ?current, "Call state");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, hanging up");
    call.stop().await;
    watcher.abort();
    Ok(())
}
