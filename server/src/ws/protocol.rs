//! JSON event protocol spoken on an open connection.
//!
//! Inbound: `{"type": ..., ...fields}`. Outbound: `{"type": ..., "data": ...}`.
//! Unknown types and malformed events are dropped without closing the socket.

use serde::{Deserialize, Serialize};

use crate::channels::{ChannelId, ChannelKind};
use crate::chat::broadcast::{broadcast_new_message, broadcast_read_receipt};
use crate::db::models::Message;
use crate::error::{blocking, EventError, StoreError};
use crate::state::AppState;
use crate::ws::broadcast::send_to_connection;
use crate::ws::ConnectionHandle;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "message.send")]
    MessageSend {
        #[serde(default)]
        body: Option<String>,
    },
    #[serde(rename = "conversation.read")]
    ConversationRead {
        #[serde(default)]
        last_message_id: Option<i64>,
    },
    #[serde(rename = "group.read")]
    GroupRead {
        #[serde(default)]
        last_message_id: Option<i64>,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(other)]
    Unknown,
}

/// Payload of a `*.read` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadReceipt {
    pub channel_id: i64,
    pub reader_id: i64,
    pub last_message_id: i64,
    pub updated_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "message.new")]
    MessageNew(Message),
    #[serde(rename = "conversation.read")]
    ConversationRead(ReadReceipt),
    #[serde(rename = "group.read")]
    GroupRead(ReadReceipt),
    #[serde(rename = "pong")]
    Pong,
    /// Sent only to the originating connection.
    #[serde(rename = "error")]
    Error { reason: String },
}

impl OutboundEvent {
    pub fn read_receipt(kind: ChannelKind, receipt: ReadReceipt) -> Self {
        match kind {
            ChannelKind::Conversation => Self::ConversationRead(receipt),
            ChannelKind::Group => Self::GroupRead(receipt),
        }
    }

    fn error(reason: &str) -> Self {
        Self::Error {
            reason: reason.to_string(),
        }
    }
}

/// Handle one inbound text frame.
pub async fn handle_text_message(text: &str, handle: &ConnectionHandle, state: &AppState) {
    let event = match serde_json::from_str::<InboundEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            let err = EventError::from(e);
            tracing::debug!(
                user_id = handle.user_id,
                channel = %handle.channel,
                error = %err,
                "Dropping inbound event"
            );
            return;
        }
    };

    if let Err(err) = dispatch_event(event, handle, state).await {
        tracing::warn!(
            user_id = handle.user_id,
            channel = %handle.channel,
            error = %err,
            "Inbound event failed"
        );
        let reason = match err {
            EventError::Persistence(_) => "persistence_failed",
            EventError::Malformed(_) => "malformed_event",
        };
        reply(handle, state, &OutboundEvent::error(reason)).await;
    }
}

/// Dispatch a decoded event to its handler.
async fn dispatch_event(
    event: InboundEvent,
    handle: &ConnectionHandle,
    state: &AppState,
) -> Result<(), EventError> {
    match event {
        InboundEvent::MessageSend { body } => {
            let body = body.unwrap_or_default();
            handle_message_send(body.trim(), handle, state).await
        }
        InboundEvent::ConversationRead { last_message_id } => {
            handle_read(ChannelKind::Conversation, last_message_id, handle, state).await
        }
        InboundEvent::GroupRead { last_message_id } => {
            handle_read(ChannelKind::Group, last_message_id, handle, state).await
        }
        InboundEvent::Ping => {
            reply(handle, state, &OutboundEvent::Pong).await;
            Ok(())
        }
        InboundEvent::Unknown => {
            tracing::debug!(user_id = handle.user_id, "Ignoring unknown event type");
            Ok(())
        }
    }
}

/// `message.send`: persist, stamp delivery if a recipient is online, relay.
async fn handle_message_send(
    body: &str,
    handle: &ConnectionHandle,
    state: &AppState,
) -> Result<(), EventError> {
    if body.is_empty() {
        return Ok(());
    }

    let channel = handle.channel;
    let sender_id = handle.user_id;

    let gate = state.gate.clone();
    let allowed = blocking(move || gate.can_send(channel, sender_id)).await?;
    if !allowed {
        tracing::debug!(user_id = sender_id, channel = %channel, "Send refused for muted member");
        reply(handle, state, &OutboundEvent::error("muted")).await;
        return Ok(());
    }

    let store = state.store.clone();
    let text = body.to_string();
    let mut message = blocking(move || store.persist_message(channel, sender_id, &text)).await?;

    if any_recipient_online(state, channel, sender_id).await {
        let store = state.store.clone();
        let message_id = message.id;
        match blocking(move || store.mark_delivered(message_id)).await {
            Ok(Some(delivered)) => message = delivered,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(message_id = message_id, error = %e, "Failed to mark message delivered");
            }
        }
    }

    let delivered = broadcast_new_message(state, channel, message).await;
    tracing::debug!(user_id = sender_id, channel = %channel, delivered = delivered, "Message relayed");
    Ok(())
}

async fn any_recipient_online(state: &AppState, channel: ChannelId, sender_id: i64) -> bool {
    let gate = state.gate.clone();
    match blocking::<_, StoreError, _>(move || gate.recipients(channel, sender_id)).await {
        Ok(recipients) => recipients
            .iter()
            .any(|user_id| state.connections.is_online(*user_id)),
        Err(e) => {
            tracing::warn!(channel = %channel, error = %e, "Failed to resolve recipients");
            false
        }
    }
}

/// `conversation.read` / `group.read`: advance the cursor and acknowledge to
/// the whole channel, even when nothing changed.
async fn handle_read(
    kind: ChannelKind,
    last_message_id: Option<i64>,
    handle: &ConnectionHandle,
    state: &AppState,
) -> Result<(), EventError> {
    let Some(last_message_id) = last_message_id else {
        return Ok(());
    };
    if kind != handle.channel.kind {
        tracing::debug!(
            user_id = handle.user_id,
            channel = %handle.channel,
            "Ignoring read receipt for another channel kind"
        );
        return Ok(());
    }

    let channel = handle.channel;
    let reader_id = handle.user_id;
    let store = state.store.clone();
    let updated_count =
        blocking(move || store.advance_read_cursor(channel, reader_id, last_message_id)).await?;

    broadcast_read_receipt(
        state,
        channel,
        ReadReceipt {
            channel_id: channel.id,
            reader_id,
            last_message_id,
            updated_count,
        },
    )
    .await;
    Ok(())
}

async fn reply(handle: &ConnectionHandle, state: &AppState, event: &OutboundEvent) {
    if let Err(failure) = send_to_connection(handle, event, state.relay.send_timeout()).await {
        tracing::debug!(
            user_id = handle.user_id,
            failure = ?failure,
            "Failed to reply to sender"
        );
    }
}
