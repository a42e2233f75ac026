//! Channel identity.
//!
//! Direct conversations and groups share one registry; they are two namespaces
//! of the same id space, distinguished by `ChannelKind`.

pub mod gate;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Conversation,
    Group,
}

impl ChannelKind {
    /// Value stored in the `channel_kind` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Group => "group",
        }
    }

    /// Inverse of `as_str`.
    pub fn from_column(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(Self::Conversation),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// Addressable fan-out scope: a conversation or group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub kind: ChannelKind,
    pub id: i64,
}

impl ChannelId {
    pub fn conversation(id: i64) -> Self {
        Self {
            kind: ChannelKind::Conversation,
            id,
        }
    }

    pub fn group(id: i64) -> Self {
        Self {
            kind: ChannelKind::Group,
            id,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct_namespaces() {
        assert_ne!(ChannelId::conversation(7), ChannelId::group(7));
        assert_eq!(ChannelId::group(7).to_string(), "group:7");
    }

    #[test]
    fn test_kind_column_value_parses_back() {
        for kind in [ChannelKind::Conversation, ChannelKind::Group] {
            assert_eq!(ChannelKind::from_column(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::from_column("dm"), None);
    }
}
