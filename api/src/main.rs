//! Sentiment API server binary.
//!
//! Entry point for the WebSocket and internal publishing server.

use sentiment_api::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sentiment_api=debug,sentiment_realtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env()?;

    tracing::info!(
        "Starting Sentiment API server on {} (bus: {})",
        config.bind_address(),
        config.bus
    );

    let server = Server::from_config(config)?;
    server.run().await?;

    Ok(())
}
