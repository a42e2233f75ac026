//! Connection registry: every live connection, indexed by channel and by user.
//!
//! All three maps sit behind one mutex so `admit`, `evict` and `snapshot`
//! are atomic with respect to each other. No lock is held across an await.

use axum::extract::ws::Message;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channels::ChannelId;

/// Sender half of a connection's outbound queue, drained by its writer task.
pub type ConnectionSender = mpsc::Sender<Message>;

pub type ConnectionId = Uuid;

/// Why a send to one connection did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The writer side is gone.
    Closed,
    /// The outbound queue stayed full for the whole send timeout.
    TimedOut,
}

/// Routing handle for one live connection. Cheap to clone; the registry and
/// the connection's own actor each hold one.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: i64,
    pub channel: ChannelId,
    sender: ConnectionSender,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(user_id: i64, channel: ChannelId, sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            channel,
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue a frame for this connection, waiting at most `timeout` for room.
    pub async fn send(&self, msg: Message, timeout: Duration) -> Result<(), SendFailure> {
        self.sender
            .send_timeout(msg, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendFailure::TimedOut,
                SendTimeoutError::Closed(_) => SendFailure::Closed,
            })
    }

    /// Queue a frame only if there is room right now.
    pub fn try_send(&self, msg: Message) -> Result<(), SendFailure> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::TimedOut,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Token cancelled when this connection must stop (evicted or closing).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Default)]
struct RegistryState {
    channel_subscribers: HashMap<ChannelId, HashMap<ConnectionId, ConnectionHandle>>,
    user_connections: HashMap<i64, HashSet<ConnectionId>>,
    connection_owner: HashMap<ConnectionId, i64>,
}

impl RegistryState {
    fn remove(&mut self, channel: ChannelId, id: ConnectionId) -> Option<ConnectionHandle> {
        let subscribers = self.channel_subscribers.get_mut(&channel)?;
        let handle = subscribers.remove(&id)?;
        if subscribers.is_empty() {
            self.channel_subscribers.remove(&channel);
        }

        if let Some(owner) = self.connection_owner.remove(&id) {
            if let Some(connections) = self.user_connections.get_mut(&owner) {
                connections.remove(&id);
                if connections.is_empty() {
                    self.user_connections.remove(&owner);
                }
            }
        }

        Some(handle)
    }
}

/// Process-wide registry of live connections. Clones share the same state.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // The maps are left consistent at every await-free step, so a
        // poisoned guard is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection under its channel and user. Returns true when
    /// this is the user's first live connection.
    pub fn admit(&self, handle: ConnectionHandle) -> bool {
        let mut state = self.state();
        let id = handle.id;
        let user_id = handle.user_id;

        state
            .channel_subscribers
            .entry(handle.channel)
            .or_default()
            .insert(id, handle);
        state.connection_owner.insert(id, user_id);
        let connections = state.user_connections.entry(user_id).or_default();
        connections.insert(id);
        let first = connections.len() == 1;

        tracing::debug!(
            user_id = user_id,
            connection_id = %id,
            connections = connections.len(),
            "Connection admitted"
        );
        first
    }

    /// Remove a connection and signal its shutdown token. No-op (returns
    /// false) if it is not registered under `channel`.
    pub fn evict(&self, channel: ChannelId, id: ConnectionId) -> bool {
        let removed = self.state().remove(channel, id);
        match removed {
            Some(handle) => {
                handle.shutdown.cancel();
                tracing::debug!(
                    user_id = handle.user_id,
                    channel = %channel,
                    connection_id = %id,
                    "Connection evicted"
                );
                true
            }
            None => false,
        }
    }

    /// Evict several connections of one channel under a single lock.
    pub fn evict_all(&self, channel: ChannelId, ids: &[ConnectionId]) -> usize {
        let removed: Vec<ConnectionHandle> = {
            let mut state = self.state();
            ids.iter().filter_map(|id| state.remove(channel, *id)).collect()
        };
        for handle in &removed {
            handle.shutdown.cancel();
        }
        if !removed.is_empty() {
            tracing::debug!(
                channel = %channel,
                evicted = removed.len(),
                "Evicted dead connections"
            );
        }
        removed.len()
    }

    /// Point-in-time copy of a channel's subscribers.
    pub fn snapshot(&self, channel: ChannelId) -> Vec<ConnectionHandle> {
        self.state()
            .channel_subscribers
            .get(&channel)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// True iff the user holds at least one live connection on any channel.
    pub fn is_online(&self, user_id: i64) -> bool {
        self.state()
            .user_connections
            .get(&user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.state()
            .user_connections
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    pub fn subscriber_count(&self, channel: ChannelId) -> usize {
        self.state()
            .channel_subscribers
            .get(&channel)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(user_id: i64, channel: ChannelId) -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(user_id, channel, tx), rx)
    }

    #[test]
    fn test_admit_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let channel = ChannelId::conversation(7);
        let (a, _rx_a) = handle(1, channel);
        let (b, _rx_b) = handle(2, channel);

        assert!(registry.admit(a.clone()));
        assert!(registry.admit(b.clone()));

        let mut ids: Vec<ConnectionId> = registry.snapshot(channel).iter().map(|h| h.id).collect();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(registry.snapshot(ChannelId::group(7)).is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = ConnectionRegistry::new();
        let channel = ChannelId::group(3);
        let (a, _rx) = handle(1, channel);
        registry.admit(a.clone());

        let snapshot = registry.snapshot(channel);
        registry.evict(channel, a.id);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.subscriber_count(channel), 0);
    }

    #[test]
    fn test_presence_survives_until_last_connection() {
        let registry = ConnectionRegistry::new();
        let (phone, _rx1) = handle(1, ChannelId::conversation(7));
        let (laptop, _rx2) = handle(1, ChannelId::group(9));

        assert!(registry.admit(phone.clone()));
        assert!(!registry.admit(laptop.clone()));
        assert_eq!(registry.connection_count(1), 2);

        registry.evict(phone.channel, phone.id);
        assert!(registry.is_online(1));

        registry.evict(laptop.channel, laptop.id);
        assert!(!registry.is_online(1));
    }

    #[test]
    fn test_evict_is_idempotent_and_drops_empty_entries() {
        let registry = ConnectionRegistry::new();
        let channel = ChannelId::conversation(7);
        let (a, _rx) = handle(1, channel);
        registry.admit(a.clone());

        assert!(registry.evict(channel, a.id));
        assert!(!registry.evict(channel, a.id));

        let state = registry.state();
        assert!(state.channel_subscribers.is_empty());
        assert!(state.user_connections.is_empty());
        assert!(state.connection_owner.is_empty());
    }

    #[test]
    fn test_evict_with_wrong_channel_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = handle(1, ChannelId::conversation(7));
        registry.admit(a.clone());

        assert!(!registry.evict(ChannelId::group(7), a.id));
        assert!(registry.is_online(1));
    }

    #[test]
    fn test_evict_cancels_shutdown_token() {
        let registry = ConnectionRegistry::new();
        let channel = ChannelId::conversation(7);
        let (a, _rx) = handle(1, channel);
        let token = a.shutdown_token();
        registry.admit(a.clone());

        assert!(!token.is_cancelled());
        registry.evict(channel, a.id);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_evict_all_batch() {
        let registry = ConnectionRegistry::new();
        let channel = ChannelId::group(1);
        let (a, _r1) = handle(1, channel);
        let (b, _r2) = handle(2, channel);
        let (c, _r3) = handle(3, channel);
        for h in [&a, &b, &c] {
            registry.admit(h.clone());
        }

        assert_eq!(registry.evict_all(channel, &[a.id, c.id, a.id]), 2);
        assert_eq!(registry.subscriber_count(channel), 1);
        assert!(registry.is_online(2));
        assert!(!registry.is_online(1));
    }

    #[test]
    fn test_unknown_ids_are_empty() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.is_online(42));
        assert!(registry.snapshot(ChannelId::conversation(42)).is_empty());
        assert!(!registry.evict(ChannelId::conversation(42), Uuid::now_v7()));
    }
}
