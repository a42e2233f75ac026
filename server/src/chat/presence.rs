//! Presence: derived entirely from the connection registry.
//!
//! A user is online iff they hold at least one live connection on any
//! channel. The persisted `users.is_online` column mirrors the registry and
//! is never read back.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::error::{blocking, StoreError};
use crate::state::AppState;

/// Whether the user has any live connection.
pub fn is_user_online(state: &AppState, user_id: i64) -> bool {
    state.connections.is_online(user_id)
}

/// Write the user's current registry presence to the store.
///
/// The value is read from the registry after taking `presence_writes`, not
/// passed in by the caller. Writes for a close and a quick reconnect may be
/// queued in either order, and whichever commits last still records what the
/// registry holds at that point.
pub async fn sync_presence(state: &AppState, user_id: i64) {
    let _guard = state.presence_writes.lock().await;
    let online = is_user_online(state, user_id);

    let store = state.store.clone();
    match blocking::<_, StoreError, _>(move || store.set_user_online(user_id, online)).await {
        Ok(()) => tracing::info!(user_id = user_id, online = online, "Presence changed"),
        Err(e) => {
            tracing::warn!(user_id = user_id, online = online, error = %e, "Failed to record presence")
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: i64,
    pub online: bool,
}

/// GET /api/presence/{user_id}: current presence of one user. JWT auth required.
pub async fn get_presence(
    State(state): State<AppState>,
    _claims: Claims,
    Path(user_id): Path<i64>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        user_id,
        online: is_user_online(&state, user_id),
    })
}
