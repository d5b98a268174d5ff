//! Inbound event router.
//!
//! Maps the `type` tag of a parsed client event to a handler. The table is
//! built before serving starts and shared read-only afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::messages::ClientEvent;

/// What a handler can reach while processing an event.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Connection the event arrived on.
    pub connection: Connection,
    /// Dispatcher for fan-out to other connections.
    pub dispatcher: Dispatcher,
}

/// Boxed event handler.
pub type EventHandler =
    Arc<dyn Fn(EventContext, ClientEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Result of routing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A handler ran to completion.
    Handled,
    /// No handler is registered for the event type.
    Unhandled,
    /// The handler returned an error or panicked.
    Failed(String),
}

/// Event-type to handler table.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: HashMap<String, EventHandler>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("EventRouter").field("handlers", &types).finish()
    }
}

impl EventRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. A later registration for the same type replaces it.
    pub fn register_handler<F, Fut>(&mut self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(EventContext, ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event_type = event_type.into();
        let handler: EventHandler = Arc::new(move |ctx, event| handler(ctx, event).boxed());
        if self.handlers.insert(event_type.clone(), handler).is_some() {
            debug!("Replaced handler for event type {}", event_type);
        }
    }

    /// Builder form of [`EventRouter::register_handler`].
    #[must_use]
    pub fn with_handler<F, Fut>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EventContext, ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(event_type, handler);
        self
    }

    /// Returns true if a handler exists for the event type.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Returns the number of registered event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler for an event. Never fails and never closes the connection.
    pub async fn route(&self, ctx: EventContext, event: ClientEvent) -> RouteOutcome {
        let Some(handler) = self.handlers.get(&event.event_type) else {
            warn!(
                "Unknown event type {} on connection {}",
                event.event_type,
                ctx.connection.id()
            );
            return RouteOutcome::Unhandled;
        };

        let event_type = event.event_type.clone();
        let id = ctx.connection.id();

        // Both building the future and polling it may panic.
        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, event))) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        match result {
            Ok(Ok(())) => RouteOutcome::Handled,
            Ok(Err(e)) => {
                error!("Handler for {} failed on connection {}: {:#}", event_type, id, e);
                RouteOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!("Handler for {} panicked on connection {}: {}", event_type, id, msg);
                RouteOutcome::Failed(format!("panic: {msg}"))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic.downcast_ref::<&str>().map_or_else(
        || {
            panic.downcast_ref::<String>().map_or_else(
                || "Unknown panic".to_string(),
                std::string::ToString::to_string,
            )
        },
        std::string::ToString::to_string,
    )
}
