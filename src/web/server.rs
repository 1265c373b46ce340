//! Push server: HTTP listener for the WebSocket endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::PushConfig;
use crate::push::PushHub;
use crate::{DispomailError, Result};

use super::middleware::PushAuth;
use super::router::create_router;
use super::ws::PushState;

/// HTTP server exposing `/ws` and `/health`.
pub struct PushServer {
    /// Server address.
    addr: SocketAddr,
    /// Handler state.
    state: Arc<PushState>,
}

impl PushServer {
    /// Create a new push server.
    pub fn new(config: &PushConfig, hub: Arc<PushHub>, auth: PushAuth) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| DispomailError::Config(format!("invalid push address: {e}")))?;

        Ok(Self {
            addr,
            state: Arc::new(PushState::new(hub, auth)),
        })
    }

    /// Get the configured address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the server until the listener fails.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Bind, then serve in the background and return the bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                tracing::error!("Push server error: {}", e);
            }
        });

        Ok(local_addr)
    }

    async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let router = create_router(self.state);

        tracing::info!("Push server listening on http://{}", local_addr);
        axum::serve(listener, router).await?;
        Ok(())
    }
}
