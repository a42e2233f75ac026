//! Channel-scoped relay helpers for chat events.
//! Wrap chat payloads in outbound events and fan them out to a channel.

use crate::channels::ChannelId;
use crate::db::models::Message;
use crate::state::AppState;
use crate::ws::broadcast::broadcast;
use crate::ws::protocol::{OutboundEvent, ReadReceipt};

/// Broadcast `message.new` to every connection subscribed to `channel`.
pub async fn broadcast_new_message(state: &AppState, channel: ChannelId, message: Message) -> usize {
    broadcast(
        &state.connections,
        channel,
        &OutboundEvent::MessageNew(message),
        state.relay.send_timeout(),
    )
    .await
}

/// Broadcast `conversation.read` or `group.read`, matching the channel kind.
pub async fn broadcast_read_receipt(state: &AppState, channel: ChannelId, receipt: ReadReceipt) -> usize {
    broadcast(
        &state.connections,
        channel,
        &OutboundEvent::read_receipt(channel.kind, receipt),
        state.relay.send_timeout(),
    )
    .await
}
