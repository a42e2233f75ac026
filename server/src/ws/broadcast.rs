use axum::extract::ws::Message;
use futures_util::future::join_all;
use std::time::Duration;

use super::protocol::OutboundEvent;
use super::{ConnectionHandle, ConnectionRegistry, SendFailure};
use crate::channels::ChannelId;

/// Serialize an outbound event into a text frame.
pub fn encode(event: &OutboundEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound event");
            None
        }
    }
}

/// Send an event to every current subscriber of `channel`.
///
/// Sends run concurrently against a snapshot of the subscriber set, each
/// bounded by `send_timeout`. Connections whose send fails are evicted in one
/// batch afterwards. Returns the number of successful sends.
pub async fn broadcast(
    registry: &ConnectionRegistry,
    channel: ChannelId,
    event: &OutboundEvent,
    send_timeout: Duration,
) -> usize {
    let Some(msg) = encode(event) else {
        return 0;
    };

    let subscribers = registry.snapshot(channel);
    if subscribers.is_empty() {
        return 0;
    }

    let results = join_all(subscribers.iter().map(|handle| {
        let msg = msg.clone();
        async move { (handle, handle.send(msg, send_timeout).await) }
    }))
    .await;

    let mut delivered = 0;
    let mut dead = Vec::new();
    for (handle, result) in results {
        match result {
            Ok(()) => delivered += 1,
            Err(failure) => {
                tracing::warn!(
                    user_id = handle.user_id,
                    channel = %channel,
                    connection_id = %handle.id,
                    failure = ?failure,
                    "Dropping connection after failed send"
                );
                dead.push(handle.id);
            }
        }
    }

    if !dead.is_empty() {
        registry.evict_all(channel, &dead);
    }

    delivered
}

/// Send an event to one connection only.
pub async fn send_to_connection(
    handle: &ConnectionHandle,
    event: &OutboundEvent,
    send_timeout: Duration,
) -> Result<(), SendFailure> {
    match encode(event) {
        Some(msg) => handle.send(msg, send_timeout).await,
        None => Ok(()),
    }
}
