//! REST endpoints for paging through channel history.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::channels::ChannelId;
use crate::db::models::Message;
use crate::error::{blocking, StoreError};
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 100;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    pub page: u32,
    pub limit: u32,
}

/// GET /api/conversations/{id}/messages?page={n}&limit={n}
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    channel_history(state, claims.sub, ChannelId::conversation(conversation_id), query).await
}

/// GET /api/groups/{id}/messages?page={n}&limit={n}
pub async fn get_group_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    channel_history(state, claims.sub, ChannelId::group(group_id), query).await
}

/// Page 0 is the newest page; messages within a page are oldest first.
/// Non-members get 404 so channel ids are not probeable.
async fn channel_history(
    state: AppState,
    user_id: i64,
    channel: ChannelId,
    query: HistoryQuery,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let page = u32::try_from(query.page.unwrap_or(0).max(0)).unwrap_or(u32::MAX);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let gate = state.gate.clone();
    let is_member = blocking::<_, StoreError, _>(move || gate.is_channel_member(channel, user_id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !is_member {
        return Err(StatusCode::NOT_FOUND);
    }

    let store = state.store.clone();
    let messages = blocking(move || store.history(channel, page, limit))
        .await
        .map_err(|e: StoreError| {
            tracing::warn!(channel = %channel, error = %e, "History query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(HistoryResponse {
        messages,
        page,
        limit,
    }))
}
