//! Sentiment Realtime - connection registry and broadcast core.
//!
//! This crate keeps track of live WebSocket clients by client type, topic and
//! user, fans analysis results out to them, and bridges an external
//! publish/subscribe bus to the connected sockets. It is transport-agnostic:
//! the server crate adapts its socket type to [`session::Frame`].
//!
//! # Components
//!
//! - [`registry`]: Live connections by topic and user
//! - [`rate_limit`]: Per-client sliding-window limiter
//! - [`bridge`]: Bus subscriptions per occupied topic
//! - [`dispatcher`]: Topic, user and client-type fan-out
//! - [`session`]: Connection lifecycle with guaranteed cleanup
//! - [`router`]: Inbound event routing
//! - [`hub`]: Owner of all of the above
//! - [`metrics`]: Real-time metrics

pub mod bridge;
pub mod bus;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod session;
pub mod types;

pub use bridge::PubSubBridge;
pub use bus::{BusStream, ChannelBus, MemoryBus};
pub use config::RealtimeConfig;
pub use connection::Connection;
pub use dispatcher::{DeliveryReport, Dispatcher};
pub use error::{BusError, ConfigError, RealtimeError};
pub use hub::{HubStats, RealtimeHub};
pub use messages::{ClientEvent, OutboundFrame, ServerMessage};
pub use metrics::{WsMetrics, WsMetricsSnapshot};
pub use rate_limit::RateLimiter;
pub use registry::ConnectionRegistry;
pub use router::{EventContext, EventRouter, RouteOutcome};
pub use session::{serve_connection, CloseReason, Frame, SessionReport, SessionRequest, SessionState};
pub use types::{ClientType, ConnectionId, Topic, TopicKey, UserId};
