use tracing_subscriber::EnvFilter;

use modbus_gateway::{config, Gateway};

#[tokio::main]
async fn main() {
    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);

    let gateway = match Gateway::start(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "failed to start gateway");
            std::process::exit(1);
        }
    };

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");
    gateway.shutdown();

    if let Err(e) = gateway.wait().await {
        tracing::error!(error = %e, "gateway exited with error");
        std::process::exit(1);
    }
}

/// Initializes the global `tracing` subscriber. `RUST_LOG` always wins;
/// absent that, falls back to the configured `log_level`.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
