//! Database row types exposed over the wire.

use serde::Serialize;

use crate::channels::ChannelKind;

/// A persisted chat message. `delivered_at` and `read_at` are write-once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub channel_kind: ChannelKind,
    pub channel_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub created_at: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
}

impl Message {
    /// Column list matching `from_row`.
    pub const COLUMNS: &'static str =
        "id, channel_kind, channel_id, sender_id, body, created_at, delivered_at, read_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get(1)?;
        let channel_kind = ChannelKind::from_column(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown channel kind {}", kind).into(),
            )
        })?;
        Ok(Self {
            id: row.get(0)?,
            channel_kind,
            channel_id: row.get(2)?,
            sender_id: row.get(3)?,
            body: row.get(4)?,
            created_at: row.get(5)?,
            delivered_at: row.get(6)?,
            read_at: row.get(7)?,
        })
    }
}
