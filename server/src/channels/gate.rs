//! Membership gate: token verification and channel membership lookups.
//!
//! The relay only sees the `MembershipGate` trait. `SqliteGate` is the
//! production implementation over the shared SQLite connection.

use crate::auth::jwt;
use crate::channels::{ChannelId, ChannelKind};
use crate::db::{self, DbPool};
use crate::error::{GateError, StoreError};

/// Token and membership lookups consulted by sessions.
///
/// Calls are blocking; sessions invoke them through `error::blocking`.
pub trait MembershipGate: Send + Sync + 'static {
    /// Resolve a token to its user id.
    fn verify_token(&self, token: &str) -> Result<i64, GateError>;

    fn is_channel_member(&self, channel: ChannelId, user_id: i64) -> Result<bool, StoreError>;

    /// Intended recipients of a message from `sender_id`: the other participant
    /// of a conversation, or every other member of a group.
    fn recipients(&self, channel: ChannelId, sender_id: i64) -> Result<Vec<i64>, StoreError>;

    /// Whether `user_id` may post into `channel` (false for muted group members).
    fn can_send(&self, channel: ChannelId, user_id: i64) -> Result<bool, StoreError>;

    /// Verify the token and check membership in one step.
    fn authorize(&self, token: &str, channel: ChannelId) -> Result<i64, GateError> {
        let user_id = self.verify_token(token)?;
        if !self.is_channel_member(channel, user_id)? {
            return Err(GateError::NotMember { channel, user_id });
        }
        Ok(user_id)
    }
}

pub struct SqliteGate {
    db: DbPool,
    jwt_secret: Vec<u8>,
}

impl SqliteGate {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>) -> Self {
        Self { db, jwt_secret }
    }
}

impl MembershipGate for SqliteGate {
    fn verify_token(&self, token: &str) -> Result<i64, GateError> {
        jwt::verify_token(&self.db, &self.jwt_secret, token)
    }

    fn is_channel_member(&self, channel: ChannelId, user_id: i64) -> Result<bool, StoreError> {
        let conn = db::lock(&self.db)?;
        let sql = match channel.kind {
            ChannelKind::Conversation => {
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1 AND (user1_id = ?2 OR user2_id = ?2))"
            }
            ChannelKind::Group => {
                "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2)"
            }
        };
        let exists: bool = conn.query_row(sql, rusqlite::params![channel.id, user_id], |row| {
            row.get(0)
        })?;
        Ok(exists)
    }

    fn recipients(&self, channel: ChannelId, sender_id: i64) -> Result<Vec<i64>, StoreError> {
        let conn = db::lock(&self.db)?;
        let sql = match channel.kind {
            ChannelKind::Conversation => {
                "SELECT CASE WHEN user1_id = ?2 THEN user2_id ELSE user1_id END
                 FROM conversations WHERE id = ?1 AND (user1_id = ?2 OR user2_id = ?2)"
            }
            ChannelKind::Group => {
                "SELECT user_id FROM group_members WHERE group_id = ?1 AND user_id != ?2"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map(rusqlite::params![channel.id, sender_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn can_send(&self, channel: ChannelId, user_id: i64) -> Result<bool, StoreError> {
        match channel.kind {
            ChannelKind::Conversation => Ok(true),
            ChannelKind::Group => {
                let conn = db::lock(&self.db)?;
                let muted: Option<bool> = match conn.query_row(
                    "SELECT is_mute FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    rusqlite::params![channel.id, user_id],
                    |row| row.get(0),
                ) {
                    Ok(m) => Some(m),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e.into()),
                };
                Ok(muted == Some(false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    fn seeded() -> (tempfile::TempDir, SqliteGate) {
        let dir = tempfile::tempdir().unwrap();
        let db = db::init_db(dir.path().to_str().unwrap()).unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "INSERT INTO users (id, username, created_at) VALUES
                    (1, 'alice', 't'), (2, 'bob', 't'), (3, 'carol', 't');
                 INSERT INTO conversations (id, user1_id, user2_id, created_at) VALUES (7, 1, 2, 't');
                 INSERT INTO groups (id, name, created_at) VALUES (9, 'team', 't');
                 INSERT INTO group_members (group_id, user_id, role, is_mute, joined_at) VALUES
                    (9, 1, 'owner', 0, 't'), (9, 2, 'member', 0, 't'), (9, 3, 'member', 1, 't');",
            )
            .unwrap();
        }
        (dir, SqliteGate::new(db, vec![3u8; 32]))
    }

    #[test]
    fn test_conversation_membership() {
        let (_dir, gate) = seeded();
        let channel = ChannelId::conversation(7);
        assert!(gate.is_channel_member(channel, 1).unwrap());
        assert!(gate.is_channel_member(channel, 2).unwrap());
        assert!(!gate.is_channel_member(channel, 3).unwrap());
        assert!(!gate.is_channel_member(ChannelId::conversation(8), 1).unwrap());
    }

    #[test]
    fn test_group_and_conversation_ids_do_not_collide() {
        let (_dir, gate) = seeded();
        assert!(!gate.is_channel_member(ChannelId::group(7), 1).unwrap());
        assert!(gate.is_channel_member(ChannelId::group(9), 3).unwrap());
    }

    #[test]
    fn test_recipients() {
        let (_dir, gate) = seeded();
        assert_eq!(gate.recipients(ChannelId::conversation(7), 2).unwrap(), vec![1]);
        let mut group = gate.recipients(ChannelId::group(9), 1).unwrap();
        group.sort();
        assert_eq!(group, vec![2, 3]);
    }

    #[test]
    fn test_muted_member_cannot_send() {
        let (_dir, gate) = seeded();
        assert!(gate.can_send(ChannelId::group(9), 2).unwrap());
        assert!(!gate.can_send(ChannelId::group(9), 3).unwrap());
        assert!(!gate.can_send(ChannelId::group(9), 99).unwrap());
        assert!(gate.can_send(ChannelId::conversation(7), 1).unwrap());
    }

    #[test]
    fn test_authorize_rejects_non_member() {
        let (_dir, gate) = seeded();
        let token = jwt::issue_and_store(&gate.db, &gate.jwt_secret, 3, 15).unwrap();
        let err = gate.authorize(&token, ChannelId::conversation(7)).unwrap_err();
        assert!(matches!(err, GateError::NotMember { user_id: 3, .. }));

        let ok = gate.authorize(&token, ChannelId::group(9)).unwrap();
        assert_eq!(ok, 3);
    }

    #[test]
    fn test_authorize_rejects_garbage_token() {
        let (_dir, gate) = seeded();
        let err = gate.authorize("not-a-jwt", ChannelId::conversation(7)).unwrap_err();
        assert!(matches!(err, GateError::Auth(AuthError::InvalidToken)));
    }
}
