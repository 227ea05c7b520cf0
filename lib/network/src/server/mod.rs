pub mod routes;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use metrics::platform::Transport;
use metrics::SysmonReader;
use std::net::SocketAddr;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace};

pub use routes::router;

struct RunningServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// JSON over HTTP transport.
///
/// Binding happens inside [`Transport::start`], so an address already in use is reported
/// to the caller instead of being lost in a background task.
pub struct HttpTransport {
    address: String,
    running: Mutex<Option<RunningServer>>,
}

impl HttpTransport {
    /// `address` is a `host:port` pair. Port `0` binds an ephemeral port.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            running: Mutex::new(None),
        }
    }

    /// Address the server is bound to while it runs.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|server| server.local_addr)
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host(&self.address)
            .await?
            .next()
            .ok_or_else(|| anyhow!("{} did not resolve to any address", self.address))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(address = %self.address))]
    async fn start(&self, reader: SysmonReader) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("HTTP server already running");
            return Ok(());
        }

        let address = self.resolve().await?;
        let server = axum::Server::try_bind(&address)?.serve(router(reader).into_make_service());
        let local_addr = server.local_addr();

        let (shutdown, shutdown_signal) = oneshot::channel::<()>();
        let server = server.with_graceful_shutdown(async move {
            shutdown_signal.await.ok();
        });

        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("HTTP server failed: {}", e);
            }
        });

        info!(%local_addr, "HTTP server listening");
        *running = Some(RunningServer {
            local_addr,
            shutdown,
            handle,
        });
        Ok(())
    }

    #[instrument(skip_all, fields(address = %self.address))]
    async fn stop(&self) {
        let Some(server) = self.running.lock().await.take() else {
            trace!("HTTP server not running");
            return;
        };

        if server.shutdown.send(()).is_err() {
            debug!("HTTP server already gone");
        }
        if let Err(e) = server.handle.await {
            error!("HTTP server task failed: {}", e);
        }
        info!(local_addr = %server.local_addr, "HTTP server stopped");
    }
}
