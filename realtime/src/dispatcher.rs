//! Broadcast dispatcher.
//!
//! Fans a message out to a registry snapshot. Sends run concurrently with a
//! per-connection timeout; a connection whose send fails is deregistered and
//! closed without affecting the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::messages::ServerMessage;
use crate::metrics::WsMetrics;
use crate::registry::ConnectionRegistry;
use crate::types::{ClientType, ConnectionId, Topic, TopicKey, UserId};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections removed because their send failed.
    pub evicted: Vec<ConnectionId>,
    /// Topics left empty by the evictions.
    #[serde(skip)]
    pub vacated: Vec<TopicKey>,
}

impl DeliveryReport {
    /// Returns the number of targeted connections.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.evicted.len()
    }
}

/// Sends messages to topic, user and client-type audiences.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<WsMetrics>,
    send_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher over a registry.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<WsMetrics>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            send_timeout,
        }
    }

    /// Broadcasts `data` to every connection on a topic.
    pub async fn broadcast_to_topic(
        &self,
        client_type: ClientType,
        topic: &Topic,
        data: Value,
    ) -> DeliveryReport {
        let targets = self.registry.connections_for(client_type, topic);
        let message = ServerMessage::topic_update(client_type, topic, data);
        self.deliver(targets, &message).await
    }

    /// Sends a portfolio update to every connection of a user.
    pub async fn send_to_user(&self, user_id: &UserId, data: Value) -> DeliveryReport {
        let targets = self.registry.connections_for_user(user_id);
        let message = ServerMessage::user_update(data);
        self.deliver(targets, &message).await
    }

    /// Broadcasts `data` to every connection of a client type.
    pub async fn broadcast_to_type(&self, client_type: ClientType, data: Value) -> DeliveryReport {
        let targets = self.registry.connections_for_type(client_type);
        let message = ServerMessage::type_update(client_type, data);
        self.deliver(targets, &message).await
    }

    /// Sends a prepared message to a set of connections.
    pub async fn deliver(&self, targets: Vec<Connection>, message: &ServerMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if targets.is_empty() {
            return report;
        }

        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                self.metrics.record_error();
                return report;
            }
        };

        let timeout = self.send_timeout;
        let results = join_all(targets.iter().map(|conn| {
            let frame = Arc::clone(&frame);
            async move { conn.send_frame(frame, timeout).await }
        }))
        .await;

        for (conn, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Evicting connection {}: {}", conn.id(), e);
                    conn.close();
                    if let Some(removed) = self.registry.deregister(conn.id()) {
                        self.metrics.record_connection_closed();
                        if removed.topic_vacated {
                            report.vacated.push(removed.connection.key().clone());
                        }
                    }
                    report.evicted.push(conn.id());
                }
            }
        }

        self.metrics.record_messages_sent(report.delivered as u64);
        self.metrics.record_evictions(report.evicted.len() as u64);
        debug!(
            "Delivered {} frame(s), evicted {}",
            report.delivered,
            report.evicted.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn aapl() -> Topic {
        Topic::new("AAPL").expect("topic")
    }

    fn setup() -> (Arc<ConnectionRegistry>, Dispatcher) {
        let registry = Arc::new(ConnectionRegistry::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(WsMetrics::new()),
            Duration::from_millis(50),
        );
        (registry, dispatcher)
    }

    fn register(
        registry: &ConnectionRegistry,
        client_type: ClientType,
        user: Option<&str>,
    ) -> (Connection, mpsc::Receiver<crate::messages::OutboundFrame>) {
        let key = TopicKey::new(client_type, aapl());
        let (conn, rx) = Connection::channel(key, user.and_then(UserId::new), 8);
        registry.register(conn.clone()).expect("register");
        (conn, rx)
    }

    #[tokio::test]
    async fn test_broadcast_to_topic() {
        let (registry, dispatcher) = setup();
        let (_a, mut rx_a) = register(&registry, ClientType::Sentiment, None);
        let (_b, mut rx_b) = register(&registry, ClientType::Sentiment, None);
        let (_c, mut rx_c) = register(&registry, ClientType::Trading, None);

        let report = dispatcher
            .broadcast_to_topic(ClientType::Sentiment, &aapl(), json!({"compound": 0.42}))
            .await;

        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.expect("frame");
            let value: Value = serde_json::from_str(&frame).expect("json");
            assert_eq!(value["type"], "sentiment");
            assert_eq!(value["topic"], "AAPL");
            assert_eq!(value["data"]["compound"], 0.42);
        }
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failed_connection() {
        let (registry, dispatcher) = setup();
        let mut receivers = Vec::new();
        let mut conns = Vec::new();
        for _ in 0..5 {
            let (conn, rx) = register(&registry, ClientType::Sentiment, None);
            conns.push(conn);
            receivers.push(rx);
        }

        // Connection 2's writer is gone.
        let broken = conns.remove(2);
        drop(receivers.remove(2));

        let report = dispatcher
            .broadcast_to_topic(ClientType::Sentiment, &aapl(), json!({"n": 1}))
            .await;

        assert_eq!(report.delivered, 4);
        assert_eq!(report.evicted, vec![broken.id()]);
        assert!(report.vacated.is_empty());
        assert!(!registry.contains(broken.id()));
        assert!(broken.is_closed());
        for conn in &conns {
            assert!(registry.contains(conn.id()));
        }
        for rx in &mut receivers {
            assert!(rx.recv().await.is_some());
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted() {
        let (registry, dispatcher) = setup();
        let key = TopicKey::new(ClientType::Trading, aapl());
        let (slow, _slow_rx) = Connection::channel(key, None, 1);
        registry.register(slow.clone()).expect("register");
        let (_fast, mut fast_rx) = register(&registry, ClientType::Trading, None);

        let first = dispatcher
            .broadcast_to_topic(ClientType::Trading, &aapl(), json!(1))
            .await;
        assert_eq!(first.delivered, 2);
        assert!(fast_rx.recv().await.is_some());

        let second = dispatcher
            .broadcast_to_topic(ClientType::Trading, &aapl(), json!(2))
            .await;
        assert_eq!(second.delivered, 1);
        assert_eq!(second.evicted, vec![slow.id()]);
        assert!(fast_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_eviction_reports_vacated_topic() {
        let (registry, dispatcher) = setup();
        let (conn, rx) = register(&registry, ClientType::Sentiment, None);
        drop(rx);

        let report = dispatcher
            .broadcast_to_topic(ClientType::Sentiment, &aapl(), json!({}))
            .await;

        assert_eq!(report.evicted, vec![conn.id()]);
        assert_eq!(report.vacated, vec![conn.key().clone()]);
    }

    #[tokio::test]
    async fn test_send_to_user() {
        let (registry, dispatcher) = setup();
        let (_a, mut rx_a) = register(&registry, ClientType::Portfolio, Some("42"));
        let (_b, mut rx_b) = register(&registry, ClientType::Portfolio, Some("7"));

        let user = UserId::new("42").expect("user");
        let report = dispatcher.send_to_user(&user, json!({"cash": 10})).await;

        assert_eq!(report.delivered, 1);
        let frame = rx_a.recv().await.expect("frame");
        let value: Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(value["type"], "portfolio_update");
        assert_eq!(value["data"]["cash"], 10);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_type() {
        let (registry, dispatcher) = setup();
        let (_a, mut rx_a) = register(&registry, ClientType::Trading, None);
        let key = TopicKey::new(ClientType::Trading, Topic::new("MSFT").expect("topic"));
        let (b, mut rx_b) = Connection::channel(key, None, 8);
        registry.register(b).expect("register");

        let report = dispatcher
            .broadcast_to_type(ClientType::Trading, json!({"halt": true}))
            .await;

        assert_eq!(report.delivered, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_topic() {
        let (_registry, dispatcher) = setup();
        let report = dispatcher
            .broadcast_to_topic(ClientType::Sentiment, &aapl(), json!({}))
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(report.attempted(), 0);
    }
}
