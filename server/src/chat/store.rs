//! Message persistence: the single source of truth for message state.
//!
//! The relay never caches message content past one relay call; every
//! delivered/read transition goes through `MessageStore`.

use crate::channels::ChannelId;
use crate::db::{self, models::Message, DbPool};
use crate::error::StoreError;

/// Blocking persistence operations consumed by the session protocol.
pub trait MessageStore: Send + Sync + 'static {
    fn persist_message(
        &self,
        channel: ChannelId,
        sender_id: i64,
        body: &str,
    ) -> Result<Message, StoreError>;

    /// Stamp `delivered_at` if not already set. Returns the current record, or
    /// `None` if the message does not exist.
    fn mark_delivered(&self, message_id: i64) -> Result<Option<Message>, StoreError>;

    /// Advance the reader's cursor to `last_message_id` and stamp `read_at` on
    /// unread messages from other senders up to it. Returns the number of
    /// messages newly marked read; 0 when the cursor would not move forward.
    fn advance_read_cursor(
        &self,
        channel: ChannelId,
        user_id: i64,
        last_message_id: i64,
    ) -> Result<usize, StoreError>;

    /// Record a presence transition (and last-seen time when going offline).
    fn set_user_online(&self, user_id: i64, online: bool) -> Result<(), StoreError>;

    /// One page of channel history, oldest first within the page. Page 0 is
    /// the most recent.
    fn history(&self, channel: ChannelId, page: u32, limit: u32) -> Result<Vec<Message>, StoreError>;
}

pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn fetch_message(conn: &rusqlite::Connection, id: i64) -> Result<Option<Message>, StoreError> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", Message::COLUMNS);
    match conn.query_row(&sql, rusqlite::params![id], Message::from_row) {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl MessageStore for SqliteStore {
    fn persist_message(
        &self,
        channel: ChannelId,
        sender_id: i64,
        body: &str,
    ) -> Result<Message, StoreError> {
        let conn = db::lock(&self.db)?;
        let created_at = db::now_rfc3339();
        conn.execute(
            "INSERT INTO messages (channel_kind, channel_id, sender_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![channel.kind.as_str(), channel.id, sender_id, body, created_at],
        )?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            channel_kind: channel.kind,
            channel_id: channel.id,
            sender_id,
            body: body.to_string(),
            created_at,
            delivered_at: None,
            read_at: None,
        })
    }

    fn mark_delivered(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let conn = db::lock(&self.db)?;
        conn.execute(
            "UPDATE messages SET delivered_at = ?1 WHERE id = ?2 AND delivered_at IS NULL",
            rusqlite::params![db::now_rfc3339(), message_id],
        )?;
        fetch_message(&conn, message_id)
    }

    fn advance_read_cursor(
        &self,
        channel: ChannelId,
        user_id: i64,
        last_message_id: i64,
    ) -> Result<usize, StoreError> {
        let mut conn = db::lock(&self.db)?;
        let tx = conn.transaction()?;

        let current: Option<i64> = match tx.query_row(
            "SELECT last_message_id FROM read_cursors
             WHERE channel_kind = ?1 AND channel_id = ?2 AND user_id = ?3",
            rusqlite::params![channel.kind.as_str(), channel.id, user_id],
            |row| row.get(0),
        ) {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        // A cursor past the newest message would hide later arrivals.
        let newest: Option<i64> = tx.query_row(
            "SELECT MAX(id) FROM messages WHERE channel_kind = ?1 AND channel_id = ?2",
            rusqlite::params![channel.kind.as_str(), channel.id],
            |row| row.get(0),
        )?;
        let last_message_id = last_message_id.min(newest.unwrap_or(0));

        if last_message_id <= current.unwrap_or(0) {
            return Ok(0);
        }

        let now = db::now_rfc3339();
        tx.execute(
            "INSERT INTO read_cursors (channel_kind, channel_id, user_id, last_message_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (channel_kind, channel_id, user_id)
             DO UPDATE SET last_message_id = excluded.last_message_id, updated_at = excluded.updated_at",
            rusqlite::params![channel.kind.as_str(), channel.id, user_id, last_message_id, now],
        )?;
        let updated = tx.execute(
            "UPDATE messages SET read_at = ?1
             WHERE channel_kind = ?2 AND channel_id = ?3 AND id <= ?4
               AND sender_id != ?5 AND read_at IS NULL",
            rusqlite::params![now, channel.kind.as_str(), channel.id, last_message_id, user_id],
        )?;
        tx.commit()?;

        Ok(updated)
    }

    fn set_user_online(&self, user_id: i64, online: bool) -> Result<(), StoreError> {
        let conn = db::lock(&self.db)?;
        if online {
            conn.execute(
                "UPDATE users SET is_online = 1 WHERE id = ?1",
                rusqlite::params![user_id],
            )?;
        } else {
            conn.execute(
                "UPDATE users SET is_online = 0, last_seen_at = ?1 WHERE id = ?2",
                rusqlite::params![db::now_rfc3339(), user_id],
            )?;
        }
        Ok(())
    }

    fn history(&self, channel: ChannelId, page: u32, limit: u32) -> Result<Vec<Message>, StoreError> {
        let conn = db::lock(&self.db)?;
        let sql = format!(
            "SELECT {} FROM messages WHERE channel_kind = ?1 AND channel_id = ?2
             ORDER BY id DESC LIMIT ?3 OFFSET ?4",
            Message::COLUMNS
        );
        let offset = i64::from(page) * i64::from(limit);
        let mut stmt = conn.prepare(&sql)?;
        let mut messages = stmt
            .query_map(
                rusqlite::params![channel.kind.as_str(), channel.id, limit, offset],
                Message::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}
