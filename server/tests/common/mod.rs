//! Shared harness: a relay server on a random port over a seeded temp database.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::channels::ChannelId;
use relay_server::config::RelayConfig;
use relay_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;
pub const DAVE: i64 = 4;

/// Conversation between Alice and Bob.
pub const CONV_AB: i64 = 7;
/// Conversation between Alice and Carol.
pub const CONV_AC: i64 = 8;
/// Group: Alice (owner), Bob, Carol (muted). Dave is not a member.
pub const GROUP: i64 = 9;

const SEED: &str = "
INSERT INTO users (id, username, created_at) VALUES
    (1, 'alice', '2026-01-01T00:00:00.000Z'),
    (2, 'bob', '2026-01-01T00:00:00.000Z'),
    (3, 'carol', '2026-01-01T00:00:00.000Z'),
    (4, 'dave', '2026-01-01T00:00:00.000Z');
INSERT INTO conversations (id, user1_id, user2_id, created_at) VALUES
    (7, 1, 2, '2026-01-01T00:00:00.000Z'),
    (8, 1, 3, '2026-01-01T00:00:00.000Z');
INSERT INTO groups (id, name, created_at) VALUES (9, 'crew', '2026-01-01T00:00:00.000Z');
INSERT INTO group_members (group_id, user_id, role, is_mute, joined_at) VALUES
    (9, 1, 'owner', 0, '2026-01-01T00:00:00.000Z'),
    (9, 2, 'member', 0, '2026-01-01T00:00:00.000Z'),
    (9, 3, 'member', 1, '2026-01-01T00:00:00.000Z');
";

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Mint a valid access token for a seeded user.
    pub fn token(&self, user_id: i64) -> String {
        relay_server::auth::jwt::issue_and_store(&self.state.db, &self.state.jwt_secret, user_id, 15)
            .expect("Failed to issue token")
    }

    /// Mint a token that expired five minutes ago.
    pub fn expired_token(&self, user_id: i64) -> String {
        relay_server::auth::jwt::issue_and_store(&self.state.db, &self.state.jwt_secret, user_id, -5)
            .expect("Failed to issue token")
    }

    pub fn conversation_url(&self, conversation_id: i64, token: &str) -> String {
        format!("ws://{}/ws/{}?token={}", self.addr, conversation_id, token)
    }

    pub fn group_url(&self, group_id: i64, token: &str) -> String {
        format!("ws://{}/ws/groups/{}?token={}", self.addr, group_id, token)
    }

    /// Connect to a channel and wait until the server has admitted the connection.
    pub async fn join(&self, channel: ChannelId, user_id: i64) -> (WsWrite, WsRead) {
        let before = self.state.connections.subscriber_count(channel);
        let token = self.token(user_id);
        let url = match channel.kind {
            relay_server::channels::ChannelKind::Conversation => self.conversation_url(channel.id, &token),
            relay_server::channels::ChannelKind::Group => self.group_url(channel.id, &token),
        };
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect to WebSocket");
        self.wait_for_subscribers(channel, before + 1).await;
        ws_stream.split()
    }

    /// Poll the registry until the channel has exactly `count` subscribers.
    pub async fn wait_for_subscribers(&self, channel: ChannelId, count: usize) {
        for _ in 0..100 {
            if self.state.connections.subscriber_count(channel) == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "Expected {} subscribers on {}, found {}",
            count,
            channel,
            self.state.connections.subscriber_count(channel)
        );
    }
}

/// Start the server on a random port with default relay tuning.
pub async fn start_test_server() -> TestServer {
    start_test_server_with(RelayConfig::default()).await
}

pub async fn start_test_server_with(relay: RelayConfig) -> TestServer {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = dir.path().to_str().unwrap().to_string();

    let db = relay_server::db::init_db(&data_dir).expect("Failed to init DB");
    db.lock().unwrap().execute_batch(SEED).expect("Failed to seed DB");
    let jwt_secret = relay_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState::new(db, jwt_secret, relay);
    let app = relay_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        _dir: dir,
    }
}

/// Read the next JSON event, skipping transport heartbeats.
pub async fn next_event(read: &mut WsRead) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected event within timeout");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("Event is not JSON");
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text event, got: {:?}", other),
        }
    }
}

/// Assert no event arrives within `ms` milliseconds.
pub async fn assert_silent(read: &mut WsRead, ms: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected silence, got: {:?}", other),
        }
    }
}

/// Read frames until the server's close frame and return its code.
pub async fn expect_close_code(read: &mut WsRead) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected close within timeout");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Ping(_))) => continue,
            other => panic!("Expected close frame, got: {:?}", other),
        }
    }
}

pub fn text(value: serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}
