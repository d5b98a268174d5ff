//! API server implementation.
//!
//! Builds the channel bus and hub from configuration, serves the router, and
//! closes every live session when the shutdown signal fires.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sentiment_realtime::{ChannelBus, MemoryBus, RealtimeHub};

use crate::config::{BusBackend, ServerConfig};
use crate::error::ApiError;
use crate::events::default_router;
use crate::redis_bus::RedisBus;
use crate::routes::create_router;
use crate::state::AppState;

/// API server.
#[derive(Debug)]
pub struct Server {
    /// Server configuration
    config: ServerConfig,
    /// Application state
    state: AppState,
}

impl Server {
    /// Creates a server around existing state.
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Creates a server with the bus selected by `config.bus`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis URL is invalid or the real-time settings
    /// fail validation.
    pub fn from_config(config: ServerConfig) -> Result<Self, ApiError> {
        let bus: Arc<dyn ChannelBus> = match config.bus {
            BusBackend::Redis => Arc::new(
                RedisBus::open(&config.redis_url)
                    .map_err(|e| ApiError::Internal(format!("Invalid Redis URL: {e}")))?,
            ),
            BusBackend::Memory => Arc::new(MemoryBus::default()),
        };
        Self::with_bus(config, bus)
    }

    /// Creates a server on the given bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the real-time settings fail validation.
    pub fn with_bus(config: ServerConfig, bus: Arc<dyn ChannelBus>) -> Result<Self, ApiError> {
        let hub = RealtimeHub::new(config.realtime.clone(), bus, default_router())?;
        info!("Channel bus: {}", config.bus);
        Ok(Self::new(config, AppState::new(hub)))
    }

    /// Returns a reference to the application state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Builds the router for this server.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Runs the server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or run.
    pub async fn run(self) -> Result<(), ApiError> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
    }

    /// Runs the server with graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or run.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ApiError> {
        let addr = self.config.bind_address();

        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| ApiError::Internal(format!("Invalid bind address: {e}")))?;

        let listener = TcpListener::bind(socket_addr)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to bind to {addr}: {e}")))?;

        self.serve(listener, shutdown_signal).await
    }

    /// Serves on an already bound listener.
    ///
    /// When `shutdown_signal` resolves the hub is shut down first, which
    /// closes every session, then the HTTP server drains.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails while running.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ApiError> {
        if let Ok(local) = listener.local_addr() {
            info!("API server listening on {}", local);
        }

        let hub = self.state.hub.clone();
        let signal = async move {
            shutdown_signal.await;
            warn!("Shutdown signal received, closing sessions");
            hub.shutdown();
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ApiError::Internal(format!("Server error: {e}")))?;

        warn!("API server shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentiment_realtime::RealtimeConfig;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn memory_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0).with_bus(BusBackend::Memory)
    }

    #[test]
    fn test_from_config_memory() {
        let server = Server::from_config(memory_config()).expect("server");
        assert_eq!(server.config().bus, BusBackend::Memory);
        assert!(server.state().hub.registry().is_empty());
    }

    #[test]
    fn test_from_config_redis_is_lazy() {
        let config = ServerConfig::new("127.0.0.1", 0);
        assert_eq!(config.bus, BusBackend::Redis);
        tokio_test::assert_ok!(Server::from_config(config));
    }

    #[test]
    fn test_from_config_rejects_invalid_realtime() {
        let config = memory_config()
            .with_realtime(RealtimeConfig::default().with_rate_limit(0, Duration::from_secs(1)));
        assert!(Server::from_config(config).is_err());
    }

    #[tokio::test]
    async fn test_serve_shuts_down_hub() {
        let server = Server::from_config(memory_config()).expect("server");
        let hub = server.state().hub.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));
        tx.send(()).expect("signal");

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server stopped")
            .expect("join")
            .expect("serve");
        assert!(hub.is_shutting_down());
    }
}
