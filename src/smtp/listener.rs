//! TCP listener for the SMTP intake.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use super::session::SmtpSession;
use crate::config::SmtpConfig;
use crate::intake::MailIntake;
use crate::Result;

/// SMTP server that accepts TCP connections.
pub struct SmtpServer {
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    config: SmtpConfig,
}

impl SmtpServer {
    /// Create a new SmtpServer bound to the configured address.
    pub async fn bind(config: &SmtpConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!("SMTP server listening on {}", local_addr);

        Ok(Self {
            listener,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            config: config.clone(),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get the maximum number of concurrent sessions.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the number of active sessions.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Accept a new connection.
    ///
    /// Waits for a free slot first, so at most `max_connections` sessions
    /// run at once.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| crate::DispomailError::Io(std::io::Error::other("semaphore closed")))?;

        let (stream, addr) = self.listener.accept().await?;
        debug!("Accepted SMTP connection from {}", addr);

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Run the server, spawning one session per connection.
    pub async fn run(self, intake: MailIntake) -> Result<()> {
        loop {
            match self.accept().await {
                Ok((stream, addr, permit)) => {
                    let intake = intake.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = SmtpSession::new(stream, intake, &config).run().await {
                            debug!("SMTP session with {} ended: {}", addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept SMTP connection: {}", e);
                }
            }
        }
    }
}

/// A permit that represents an active session slot.
///
/// When this permit is dropped, the slot is released.
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
