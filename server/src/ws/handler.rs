use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::channels::ChannelId;
use crate::error::GateError;
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::session::Session;

/// Query parameters for WebSocket connection.
/// The token is optional here so that a missing one is answered with a close
/// frame instead of a 400.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Close code for every handshake rejection: missing, invalid or expired
/// token, and non-membership.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// GET /ws/{conversation_id}?token=JWT
pub async fn conversation_upgrade(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    open_channel(state, ChannelId::conversation(conversation_id), params.token, ws).await
}

/// GET /ws/groups/{group_id}?token=JWT
pub async fn group_upgrade(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    open_channel(state, ChannelId::group(group_id), params.token, ws).await
}

/// Authorize before upgrading. On success the actor takes over the socket;
/// on failure the socket is upgraded and immediately closed with 1008.
async fn open_channel(
    state: AppState,
    channel: ChannelId,
    token: Option<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let mut session = Session::new(channel);

    match session.authorize(&state, token).await {
        Ok(user_id) => {
            tracing::info!(
                user_id = user_id,
                channel = %channel,
                "WebSocket connection authorized"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, session))
        }
        Err(err) => {
            let reason = rejection_reason(&err);
            tracing::warn!(
                channel = %channel,
                close_code = CLOSE_POLICY_VIOLATION,
                error = %err,
                "WebSocket handshake rejected"
            );
            ws.on_upgrade(move |socket| reject(socket, reason))
        }
    }
}

fn rejection_reason(err: &GateError) -> &'static str {
    match err {
        GateError::Auth(_) => "Authentication failed",
        GateError::NotMember { .. } => "Not a member of this channel",
        GateError::Store(_) => "Authorization unavailable",
    }
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    let close_frame = CloseFrame {
        code: CLOSE_POLICY_VIOLATION,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
