//! # Sentiment API
//!
//! WebSocket and internal publishing server for sentiment, trading and
//! portfolio updates.
//!
//! # Endpoints
//!
//! - `GET /ws/{client_type}/{topic}` - real-time stream for a topic
//! - `GET /ws/portfolio` - the caller's portfolio stream
//! - `GET /health` - liveness and connection count
//! - `GET /stats` - registry and metrics snapshot
//! - `POST /internal/broadcast/{client_type}/{topic}` - fan out to a topic
//! - `POST /internal/broadcast/{client_type}` - fan out to a client type
//! - `POST /internal/users/{user_id}/portfolio` - deliver to one user
//!
//! Publishers outside the process reach subscribers through the Redis
//! channels `sentiment_updates:{topic}`, `trading_updates:{topic}` and
//! friends; see [`sentiment_realtime::TopicKey::channel_name`].

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod redis_bus;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

pub use config::{BusBackend, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use redis_bus::RedisBus;
pub use routes::create_router;
pub use server::Server;
pub use state::AppState;
