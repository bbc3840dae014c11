//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::router;
use crate::error::{RatekeeperError, Result};
use crate::ratelimit::{RateLimiter, SwappableLimiter};

/// HTTP server for the rate limiting front end.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The limiter slot shared with the admin routes
    limiter: Arc<SwappableLimiter>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, limiter: Arc<SwappableLimiter>) -> Self {
        Self { addr, limiter }
    }

    /// Start the server and run until the process is killed.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// In-flight requests are drained once `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            RatekeeperError::Io(e)
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            algorithm = self.limiter.current().name(),
            "Starting HTTP server"
        );

        let app = router(self.limiter).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                RatekeeperError::Io(e)
            })?;

        info!(addr = %local_addr, "HTTP server stopped");
        Ok(())
    }
}
