//! Connection registry.
//!
//! Tracks live connections by topic key and by user. Locks are synchronous and
//! held only for map updates, so deregistration can run from `Drop`.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::connection::Connection;
use crate::error::RealtimeError;
use crate::types::{ClientType, ConnectionId, Topic, TopicKey, UserId};

/// Result of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// True if this connection opened its topic bucket.
    pub first_in_topic: bool,
}

/// Result of a deregistration that removed something.
#[derive(Debug, Clone)]
pub struct Deregistration {
    /// The removed connection.
    pub connection: Connection,
    /// True if the topic bucket is now empty.
    pub topic_vacated: bool,
}

#[derive(Debug, Default)]
struct RegistryIndex {
    connections: HashMap<ConnectionId, Connection>,
    topics: HashMap<TopicKey, HashSet<ConnectionId>>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RegistryIndex {
    fn collect<'a>(&self, ids: impl IntoIterator<Item = &'a ConnectionId>) -> Vec<Connection> {
        ids.into_iter()
            .filter_map(|id| self.connections.get(id).cloned())
            .collect()
    }
}

/// Registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    index: RwLock<RegistryIndex>,
    accepted: Vec<ClientType>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(ClientType::ALL.to_vec())
    }
}

impl ConnectionRegistry {
    /// Creates a registry accepting the given client types.
    #[must_use]
    pub fn new(accepted: Vec<ClientType>) -> Self {
        Self {
            index: RwLock::new(RegistryIndex::default()),
            accepted,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection under its topic key and user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClientType` if the client type is not accepted, or
    /// `AlreadyRegistered` if the connection id is already present.
    pub fn register(&self, connection: Connection) -> Result<Registration, RealtimeError> {
        let client_type = connection.client_type();
        if !self.accepted.contains(&client_type) {
            return Err(RealtimeError::InvalidClientType(
                client_type.as_str().to_string(),
            ));
        }

        let mut index = self.write();
        let id = connection.id();
        if index.connections.contains_key(&id) {
            return Err(RealtimeError::AlreadyRegistered(id));
        }

        let bucket = index.topics.entry(connection.key().clone()).or_default();
        let first_in_topic = bucket.is_empty();
        bucket.insert(id);

        if let Some(user) = connection.user_id() {
            index.users.entry(user.clone()).or_default().insert(id);
        }

        debug!("Registered connection {} on {}", id, connection.key());
        index.connections.insert(id, connection);

        Ok(Registration { first_in_topic })
    }

    /// Removes a connection from every index.
    ///
    /// Returns None if the connection was not registered.
    pub fn deregister(&self, id: ConnectionId) -> Option<Deregistration> {
        let mut index = self.write();
        let connection = index.connections.remove(&id)?;

        let mut topic_vacated = false;
        if let Some(bucket) = index.topics.get_mut(connection.key()) {
            bucket.remove(&id);
            if bucket.is_empty() {
                index.topics.remove(connection.key());
                topic_vacated = true;
            }
        }

        if let Some(user) = connection.user_id() {
            if let Some(ids) = index.users.get_mut(user) {
                ids.remove(&id);
                if ids.is_empty() {
                    index.users.remove(user);
                }
            }
        }

        debug!("Deregistered connection {} from {}", id, connection.key());
        Some(Deregistration {
            connection,
            topic_vacated,
        })
    }

    /// Returns true if the connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().connections.contains_key(&id)
    }

    /// Returns a snapshot of the connections on a topic.
    #[must_use]
    pub fn connections_for(&self, client_type: ClientType, topic: &Topic) -> Vec<Connection> {
        let key = TopicKey::new(client_type, topic.clone());
        let index = self.read();
        index
            .topics
            .get(&key)
            .map(|ids| index.collect(ids))
            .unwrap_or_default()
    }

    /// Returns a snapshot of a user's connections.
    #[must_use]
    pub fn connections_for_user(&self, user_id: &UserId) -> Vec<Connection> {
        let index = self.read();
        index
            .users
            .get(user_id)
            .map(|ids| index.collect(ids))
            .unwrap_or_default()
    }

    /// Returns a snapshot of every connection of a client type.
    #[must_use]
    pub fn connections_for_type(&self, client_type: ClientType) -> Vec<Connection> {
        self.read()
            .connections
            .values()
            .filter(|c| c.client_type() == client_type)
            .cloned()
            .collect()
    }

    /// Returns a snapshot of every connection.
    #[must_use]
    pub fn all(&self) -> Vec<Connection> {
        self.read().connections.values().cloned().collect()
    }

    /// Returns true if the topic bucket has at least one connection.
    #[must_use]
    pub fn is_occupied(&self, key: &TopicKey) -> bool {
        self.read().topics.contains_key(key)
    }

    /// Returns the topic keys with at least one connection.
    #[must_use]
    pub fn topics(&self) -> Vec<TopicKey> {
        self.read().topics.keys().cloned().collect()
    }

    /// Returns the number of connections on a topic.
    #[must_use]
    pub fn subscriber_count(&self, key: &TopicKey) -> usize {
        self.read().topics.get(key).map(HashSet::len).unwrap_or(0)
    }

    /// Returns the number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().connections.len()
    }

    /// Returns true if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().connections.is_empty()
    }

    /// Returns the number of occupied topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.read().topics.len()
    }

    /// Returns the number of users with at least one connection.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.read().users.len()
    }
}
