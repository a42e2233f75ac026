//! Error taxonomy for the relay.
//!
//! Handshake failures (`AuthError`, `GateError`) are terminal for the attempt and
//! close the socket with the policy-violation code. `EventError` is scoped to a
//! single inbound event and never tears down the session.

use thiserror::Error;

use crate::channels::ChannelId;

/// Token problems detected while opening a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    ExpiredToken,
}

/// Failures of the external store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of the membership gate for a handshake.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("user {user_id} is not a member of {channel}")]
    NotMember { channel: ChannelId, user_id: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure handling one inbound event. The connection stays open.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Run a blocking store or gate call on the blocking pool. A failed join is
/// reported as the store being unavailable.
pub async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        E::from(StoreError::Unavailable(format!("blocking task failed: {}", e)))
    })?
}
