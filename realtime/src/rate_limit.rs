//! Sliding-window rate limiter.
//!
//! Each client keeps the instants of its recent requests. Stale entries are
//! purged lazily on the client's next call; there is no background sweep.
//! Windows are sharded by client id to keep lock contention local.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::ConnectionId;

type Window = HashMap<ConnectionId, VecDeque<Instant>>;
type Shard = Mutex<Window>;

/// Per-client sliding-window request limiter.
#[derive(Debug)]
pub struct RateLimiter {
    shards: Vec<Shard>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_requests` per `window`.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration, shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            shards,
            max_requests,
            window,
        }
    }

    // Shard count is at least one, so the index is always in range.
    #[allow(clippy::indexing_slicing)]
    fn shard(&self, client_id: ConnectionId) -> MutexGuard<'_, Window> {
        let idx = (client_id.get() % self.shards.len() as u64) as usize;
        self.shards[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true and records the request if the client is under its limit.
    ///
    /// A rejected request is not recorded.
    pub fn allow(&self, client_id: ConnectionId) -> bool {
        let now = Instant::now();
        let mut shard = self.shard(client_id);
        let requests = shard.entry(client_id).or_default();

        while let Some(&oldest) = requests.front() {
            if now.duration_since(oldest) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }

        if requests.len() >= self.max_requests {
            return false;
        }

        requests.push_back(now);
        true
    }

    /// Returns the number of requests the client may still make right now.
    #[must_use]
    pub fn remaining(&self, client_id: ConnectionId) -> usize {
        let now = Instant::now();
        let shard = self.shard(client_id);
        let used = shard
            .get(&client_id)
            .map(|requests| {
                requests
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.window)
                    .count()
            })
            .unwrap_or(0);
        self.max_requests.saturating_sub(used)
    }

    /// Drops the client's window.
    pub fn forget(&self, client_id: ConnectionId) {
        self.shard(client_id).remove(&client_id);
    }

    /// Returns the number of clients with a live window.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Returns the configured limit.
    #[must_use]
    pub const fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Returns the configured window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}
