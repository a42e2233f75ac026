//! Per-connection lifecycle: CONNECTING -> AUTHORIZED -> OPEN -> CLOSED.
//!
//! `close` is the single cleanup path and runs its side-effects at most once,
//! however many times it is called.

use crate::channels::ChannelId;
use crate::chat::presence::sync_presence;
use crate::error::{blocking, AuthError, GateError};
use crate::state::AppState;
use crate::ws::{ConnectionHandle, ConnectionSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authorized,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct Session {
    channel: ChannelId,
    state: SessionState,
    user_id: Option<i64>,
    handle: Option<ConnectionHandle>,
}

impl Session {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            state: SessionState::Connecting,
            user_id: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    /// Verify the token and channel membership. Any failure is terminal: the
    /// session moves straight to `Closed`.
    pub async fn authorize(&mut self, state: &AppState, token: Option<String>) -> Result<i64, GateError> {
        debug_assert_eq!(self.state, SessionState::Connecting);

        let result = match token.filter(|t| !t.is_empty()) {
            None => Err(GateError::Auth(AuthError::MissingToken)),
            Some(token) => {
                let gate = state.gate.clone();
                let channel = self.channel;
                blocking(move || gate.authorize(&token, channel)).await
            }
        };

        match result {
            Ok(user_id) => {
                self.user_id = Some(user_id);
                self.state = SessionState::Authorized;
                Ok(user_id)
            }
            Err(err) => {
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    /// Admit the connection into the registry and mark the user online if this
    /// is their first live connection.
    pub async fn open(&mut self, state: &AppState, sender: ConnectionSender) -> Option<ConnectionHandle> {
        let user_id = match (self.state, self.user_id) {
            (SessionState::Authorized, Some(user_id)) => user_id,
            _ => return None,
        };

        let handle = ConnectionHandle::new(user_id, self.channel, sender);
        let first = state.connections.admit(handle.clone());
        self.handle = Some(handle.clone());
        self.state = SessionState::Open;

        if first {
            sync_presence(state, user_id).await;
        }

        tracing::info!(
            user_id = user_id,
            channel = %self.channel,
            connection_id = %handle.id,
            "Session open"
        );
        Some(handle)
    }

    /// Evict the connection, then mark the user offline if that was their
    /// last connection. Evicting before checking is required: the check must
    /// not see the connection being removed.
    pub async fn close(&mut self, state: &AppState) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        let (Some(handle), Some(user_id)) = (self.handle.take(), self.user_id) else {
            return;
        };

        state.connections.evict(self.channel, handle.id);
        if !state.connections.is_online(user_id) {
            sync_presence(state, user_id).await;
        }

        tracing::info!(
            user_id = user_id,
            channel = %self.channel,
            connection_id = %handle.id,
            "Session closed"
        );
    }
}
