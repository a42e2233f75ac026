use std::sync::Arc;

use crate::channels::gate::{MembershipGate, SqliteGate};
use crate::chat::store::{MessageStore, SqliteStore};
use crate::config::RelayConfig;
use crate::db::DbPool;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Token and membership lookups
    pub gate: Arc<dyn MembershipGate>,
    /// Message persistence and presence side-effects
    pub store: Arc<dyn MessageStore>,
    /// Live connections per channel and per user
    pub connections: ConnectionRegistry,
    /// Send timeouts, queue depth, heartbeat
    pub relay: RelayConfig,
    /// Serializes writes of the persisted presence flag
    pub presence_writes: Arc<tokio::sync::Mutex<()>>,
}

impl AppState {
    /// State backed by the SQLite gate and store.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, relay: RelayConfig) -> Self {
        Self {
            gate: Arc::new(SqliteGate::new(db.clone(), jwt_secret.clone())),
            store: Arc::new(SqliteStore::new(db.clone())),
            db,
            jwt_secret,
            connections: ConnectionRegistry::new(),
            relay,
            presence_writes: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}
