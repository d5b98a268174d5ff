//! Real-time hub.
//!
//! The single long-lived owner of the registry, rate limiter, dispatcher,
//! bridge and event router. Cloning the hub is cheap and shares all state.

use std::sync::Arc;

use futures::{Sink, Stream};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bridge::PubSubBridge;
use crate::bus::ChannelBus;
use crate::config::RealtimeConfig;
use crate::connection::Connection;
use crate::dispatcher::{DeliveryReport, Dispatcher};
use crate::error::{ConfigError, RealtimeError};
use crate::metrics::{WsMetrics, WsMetricsSnapshot};
use crate::rate_limit::RateLimiter;
use crate::registry::{ConnectionRegistry, Registration};
use crate::router::EventRouter;
use crate::session::{self, Frame, SessionReport, SessionRequest};
use crate::types::{ClientType, ConnectionId, Topic, UserId};

#[derive(Debug)]
struct HubInner {
    config: RealtimeConfig,
    registry: Arc<ConnectionRegistry>,
    limiter: RateLimiter,
    dispatcher: Dispatcher,
    bridge: PubSubBridge,
    router: EventRouter,
    metrics: Arc<WsMetrics>,
    shutdown: CancellationToken,
}

/// Point-in-time view of hub state.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Occupied topic keys.
    pub topics: usize,
    /// Users with at least one connection.
    pub users: usize,
    /// Running bus subscriptions.
    pub subscriptions: usize,
    /// Clients with a live rate-limit window.
    pub rate_limited_clients: usize,
    /// Counters.
    pub metrics: WsMetricsSnapshot,
}

/// Handle to the real-time core.
#[derive(Debug, Clone)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    /// Creates a hub over a channel bus with a frozen event router.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: RealtimeConfig,
        bus: Arc<dyn ChannelBus>,
        router: EventRouter,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new(config.client_types.clone()));
        let metrics = Arc::new(WsMetrics::new());
        let shutdown = CancellationToken::new();
        let limiter = RateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window,
            config.rate_limit_shards,
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.send_timeout,
        );
        let bridge = PubSubBridge::new(
            bus,
            Arc::clone(&registry),
            dispatcher.clone(),
            Arc::clone(&metrics),
            &config,
            shutdown.child_token(),
        );

        info!(
            "Real-time hub ready: {} req/{:?} per client, {} handler(s)",
            config.rate_limit_max_requests,
            config.rate_limit_window,
            router.len()
        );

        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                registry,
                limiter,
                dispatcher,
                bridge,
                router,
                metrics,
                shutdown,
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Returns the rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Returns the pub/sub bridge.
    #[must_use]
    pub fn bridge(&self) -> &PubSubBridge {
        &self.inner.bridge
    }

    /// Returns the event router.
    #[must_use]
    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &WsMetrics {
        &self.inner.metrics
    }

    /// Returns the hub-wide shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Returns true once [`RealtimeHub::shutdown`] was called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Registers a connection and starts its topic's bus subscription if needed.
    ///
    /// # Errors
    ///
    /// Returns the registry error if the connection is rejected.
    pub fn register(&self, connection: Connection) -> Result<Registration, RealtimeError> {
        let key = connection.key().clone();
        let registration = self.inner.registry.register(connection)?;
        self.inner.metrics.record_connection_opened();
        self.inner.bridge.sync(&key);
        Ok(registration)
    }

    /// Removes a connection and releases everything held for it.
    ///
    /// Safe to call more than once. Returns true if this call removed it.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        self.inner.limiter.forget(id);

        let Some(removed) = self.inner.registry.deregister(id) else {
            return false;
        };
        self.inner.metrics.record_connection_closed();
        if removed.topic_vacated {
            self.inner.bridge.sync(removed.connection.key());
        }
        true
    }

    /// Broadcasts `data` to every connection on a topic.
    pub async fn broadcast_to_topic(
        &self,
        client_type: ClientType,
        topic: &Topic,
        data: Value,
    ) -> DeliveryReport {
        let report = self
            .inner
            .dispatcher
            .broadcast_to_topic(client_type, topic, data)
            .await;
        self.reconcile(&report);
        report
    }

    /// Sends a portfolio update to every connection of a user.
    pub async fn send_to_user(&self, user_id: &UserId, data: Value) -> DeliveryReport {
        let report = self.inner.dispatcher.send_to_user(user_id, data).await;
        self.reconcile(&report);
        report
    }

    /// Broadcasts `data` to every connection of a client type.
    pub async fn broadcast_to_type(&self, client_type: ClientType, data: Value) -> DeliveryReport {
        let report = self
            .inner
            .dispatcher
            .broadcast_to_type(client_type, data)
            .await;
        self.reconcile(&report);
        report
    }

    fn reconcile(&self, report: &DeliveryReport) {
        for id in &report.evicted {
            self.inner.limiter.forget(*id);
        }
        for key in &report.vacated {
            self.inner.bridge.sync(key);
        }
    }

    /// Serves one connection until it closes. See [`session::serve_connection`].
    ///
    /// # Errors
    ///
    /// Returns an error if the connection could not be registered.
    pub async fn serve<S, R, E>(
        &self,
        request: SessionRequest,
        sink: S,
        stream: R,
    ) -> Result<SessionReport, RealtimeError>
    where
        S: Sink<Frame> + Send + Unpin + 'static,
        S::Error: std::fmt::Display,
        R: Stream<Item = Result<Frame, E>> + Send + Unpin,
        E: std::fmt::Display + Send,
    {
        session::serve_connection(self.clone(), request, sink, stream).await
    }

    /// Stops all bus subscriptions and signals every session to close.
    pub fn shutdown(&self) {
        info!(
            "Shutting down real-time hub with {} connection(s)",
            self.inner.registry.len()
        );
        self.inner.shutdown.cancel();
        self.inner.bridge.shutdown();
    }

    /// Returns a snapshot of hub state.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.inner.registry.len(),
            topics: self.inner.registry.topic_count(),
            users: self.inner.registry.user_count(),
            subscriptions: self.inner.bridge.active_subscriptions().len(),
            rate_limited_clients: self.inner.limiter.tracked_clients(),
            metrics: self.inner.metrics.snapshot(),
        }
    }
}
