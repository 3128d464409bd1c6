//! Server lifecycle management
//!
//! Binds the HTTP listener, serves the router until a shutdown signal, then
//! cancels live sessions and waits for them to drain.

use std::time::Duration;

use sqlx::PgPool;
use tracing::{error, info, warn};

use voxroom_core::bootstrap::Services;

/// Voxroom server - owns the wired services for the process lifetime
pub struct VoxroomServer {
    services: Services,
    pool: Option<PgPool>,
}

impl VoxroomServer {
    pub const fn new(services: Services, pool: Option<PgPool>) -> Self {
        Self { services, pool }
    }

    /// Serve HTTP and WebSocket traffic until a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let http_address = self.services.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", listener.local_addr()?);

        let router = voxroom_api::create_router(&self.services);
        let shutdown = self.services.shutdown.clone();
        let mut http_handle = tokio::spawn(async move {
            let graceful = async move { shutdown.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Ends every signaling session and stops accepting new requests
        self.services.shutdown.cancel();
        self.shutdown(http_handle).await;

        Ok(())
    }

    /// Wait for live sessions to drain, then release resources
    async fn shutdown(&self, http_handle: tokio::task::JoinHandle<()>) {
        info!("Shutting down Voxroom server...");

        let drain_timeout = Duration::from_secs(self.services.config.server.shutdown_timeout_seconds);
        let drain_poll_interval = Duration::from_millis(100);
        let active = self.services.connections.len();
        if active > 0 {
            info!(
                "Waiting up to {}s for {} active connection(s) to drain...",
                drain_timeout.as_secs(),
                active
            );
            let deadline = tokio::time::Instant::now() + drain_timeout;
            loop {
                let remaining = self.services.connections.len();
                if remaining == 0 {
                    info!("All connections drained");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        "Drain timeout reached with {} connection(s) still active, proceeding with shutdown",
                        remaining
                    );
                    break;
                }
                tokio::time::sleep(drain_poll_interval).await;
            }
        }

        if tokio::time::timeout(drain_timeout, http_handle).await.is_err() {
            warn!("HTTP server did not stop within {}s", drain_timeout.as_secs());
        }

        let relay = self.services.relay.stats();
        info!(
            packets_forwarded = relay.packets_forwarded,
            paths_opened = relay.paths_opened,
            "Relay stopped"
        );

        if let Some(pool) = &self.pool {
            info!("Closing database connection pool...");
            pool.close().await;
            info!("Database pool closed");
        }

        info!("Voxroom server shut down complete");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
