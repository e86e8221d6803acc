use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Direction;

/// A persisted chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Store-assigned persistence order, tie-breaker for equal timestamps.
    #[serde(skip)]
    pub seq: i64,
}

impl Message {
    pub fn direction_for(&self, viewer_id: &str) -> Direction {
        if self.sender_id == viewer_id {
            Direction::Sent
        } else {
            Direction::Received
        }
    }

    /// True when the message was exchanged between `a` and `b`, in either direction.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            seq: self.seq,
        }
    }

    pub fn to_history_item(&self, viewer_id: &str) -> HistoryItem {
        HistoryItem {
            id: self.id.clone(),
            content: self.content.clone(),
            direction: self.direction_for(viewer_id),
            timestamp: self.created_at,
        }
    }
}

/// Insert payload; id, timestamp and seq are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

/// One message as seen by a viewer in the history view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub content: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub peer_id: String,
    pub messages: Vec<HistoryItem>,
    /// Pass back as `before` to fetch the next older page.
    pub next_cursor: Option<String>,
}

/// Page request for history. `limit: None` returns the whole conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub before: Option<Cursor>,
    pub limit: Option<u32>,
}

/// Position in a conversation, keyed on timestamp plus persistence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let raw = format!("{}.{}", self.created_at.timestamp_millis(), self.seq);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        let (millis, seq) = raw.split_once('.')?;
        let created_at = Utc.timestamp_millis_opt(millis.parse().ok()?).single()?;
        Some(Self {
            created_at,
            seq: seq.parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: &str, receiver: &str) -> Message {
        Message {
            id: "m-1".into(),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            content: "Hello".into(),
            created_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            seq: 7,
        }
    }

    #[test]
    fn direction_is_relative_to_viewer() {
        let m = msg("doc", "pat");
        assert_eq!(m.direction_for("doc"), Direction::Sent);
        assert_eq!(m.direction_for("pat"), Direction::Received);
    }

    #[test]
    fn is_between_ignores_order() {
        let m = msg("doc", "pat");
        assert!(m.is_between("doc", "pat"));
        assert!(m.is_between("pat", "doc"));
        assert!(!m.is_between("doc", "other"));
    }

    #[test]
    fn cursor_survives_encoding() {
        let cursor = msg("a", "b").cursor();
        assert_eq!(Cursor::decode(&cursor.encode()), Some(cursor));
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        assert!(Cursor::decode("%%%").is_none());
        assert!(Cursor::decode("bm90LWEtY3Vyc29y").is_none()); // "not-a-cursor"
    }

    #[test]
    fn message_json_hides_seq() {
        let json = serde_json::to_value(msg("a", "b")).unwrap();
        assert!(json.get("seq").is_none());
        assert_eq!(json["sender_id"], "a");
        assert_eq!(json["content"], "Hello");
    }

    #[test]
    fn history_item_carries_direction() {
        let item = msg("a", "b").to_history_item("b");
        assert_eq!(item.direction, Direction::Received);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["direction"], "peer");
    }
}
