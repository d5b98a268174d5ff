//! Default client event handlers.
//!
//! - `ping` replies `pong` on the same connection.
//! - `sentiment` / `trading` on a combined stream relay the event's `data` to
//!   the sentiment or trading subscribers of the stream's topic.

use anyhow::{bail, Context};
use tracing::debug;

use sentiment_realtime::{ClientEvent, ClientType, EventContext, EventRouter, ServerMessage};

/// Builds the router used by the server.
#[must_use]
pub fn default_router() -> EventRouter {
    EventRouter::new()
        .with_handler("ping", handle_ping)
        .with_handler("sentiment", |ctx, event| {
            relay(ctx, event, ClientType::Sentiment)
        })
        .with_handler("trading", |ctx, event| relay(ctx, event, ClientType::Trading))
}

async fn handle_ping(ctx: EventContext, _event: ClientEvent) -> anyhow::Result<()> {
    ctx.connection
        .send(&ServerMessage::pong())
        .await
        .context("failed to queue pong")
}

async fn relay(ctx: EventContext, event: ClientEvent, target: ClientType) -> anyhow::Result<()> {
    if ctx.connection.client_type() != ClientType::Combined {
        bail!(
            "{} events are only accepted on combined streams",
            target.as_str()
        );
    }

    let topic = ctx.connection.topic().clone();
    let report = ctx
        .dispatcher
        .broadcast_to_topic(target, &topic, event.data)
        .await;
    debug!(
        "Relayed {} update for {} to {} connection(s)",
        target, topic, report.delivered
    );
    Ok(())
}
