//! The top-level `Gateway` composite: owns the serialization engine (and
//! the serial transport behind it), the write-dedup cache, and the TCP
//! frontend listener task, and exposes the `run`/`shutdown` lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clock::SystemClock;
use crate::config::GatewayConfig;
use crate::dedup::WriteDedupCache;
use crate::engine::SerializationEngine;
use crate::error::{GatewayError, Result};
use crate::frontend::{self, FrontendContext};
use crate::transport::{RtuTransport, SerialTransport, SerialTransportConfig};

pub struct Gateway {
    engine: Arc<SerializationEngine>,
    engine_worker: tokio::task::JoinHandle<()>,
    frontend_task: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Gateway {
    /// Binds the TCP listener and wires up the engine, dedup cache and
    /// transport, starting the frontend's accept loop in the background.
    /// Does not return until the listener is bound and the background
    /// tasks are spawned; call `wait` to block until shutdown.
    pub async fn start(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let listener = bind_tcp_listener(&config).await?;
        info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "tcp frontend listening");

        let transport: Box<dyn RtuTransport> = Box::new(SerialTransport::new(SerialTransportConfig::from(&config)));
        let (engine, engine_worker) = SerializationEngine::spawn(transport, config.queue_bound);
        let engine = Arc::new(engine);

        let dedup = Arc::new(WriteDedupCache::new(
            config.dedup_ttl_ms,
            config.dedup_max_entries,
            Arc::new(SystemClock),
        ));

        let ctx = Arc::new(FrontendContext {
            engine: engine.clone(),
            dedup,
            gateway_timeout: Duration::from_millis(config.gateway_timeout_ms),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let frontend_task = tokio::spawn(frontend::serve(listener, ctx, shutdown_rx));

        Ok(Self {
            engine,
            engine_worker,
            frontend_task,
            shutdown_tx,
        })
    }

    /// Runs the gateway until `shutdown` is called (e.g. from a signal
    /// handler) or one of the background tasks exits on its own.
    pub async fn run(config: GatewayConfig) -> Result<()> {
        let gateway = Self::start(config).await?;
        gateway.wait().await
    }

    /// Blocks until the frontend task finishes, which only happens after
    /// `shutdown` has been signalled and the accept loop has returned.
    pub async fn wait(self) -> Result<()> {
        if let Err(e) = self.frontend_task.await {
            error!(error = %e, "tcp frontend task panicked");
        }

        self.engine.shutdown();
        if let Err(e) = self.engine_worker.await {
            error!(error = %e, "serialization engine worker panicked");
        }

        Ok(())
    }

    /// Signals graceful shutdown: the frontend stops accepting new
    /// connections and the engine drains outstanding requests with
    /// `ShuttingDown` once the frontend task above observes it and exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Binds `config.tcp_host:config.tcp_port`, falling back to port 1502 if
/// binding the configured (possibly privileged) port fails with a
/// permission error, per the gateway's documented fallback behavior.
async fn bind_tcp_listener(config: &GatewayConfig) -> Result<TcpListener> {
    match TcpListener::bind(config.bind_addr()).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && config.tcp_port != 1502 => {
            warn!(
                port = config.tcp_port,
                "permission denied binding privileged port, falling back to 1502"
            );
            let fallback = format!("{}:1502", config.tcp_host);
            TcpListener::bind(fallback).await.map_err(GatewayError::Io)
        }
        Err(e) => Err(GatewayError::Io(e)),
    }
}
