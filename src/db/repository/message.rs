use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::{Message, NewMessage, PageRequest};

/// Messages of one conversation plus whether older ones exist.
#[derive(Debug, Clone, Default)]
pub struct ConversationSlice {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

const MESSAGE_COLUMNS: &str = "seq, id, sender_id, receiver_id, content, created_at";

const PAIR_FILTER: &str =
    "((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))";

pub fn insert_message(
    conn: &Connection,
    id: &str,
    msg: &NewMessage,
    created_at: DateTime<Utc>,
) -> Result<Message, DatabaseError> {
    conn.execute(
        "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id,
            msg.sender_id,
            msg.receiver_id,
            msg.content,
            created_at.timestamp_millis(),
        ],
    )?;

    Ok(Message {
        id: id.to_string(),
        sender_id: msg.sender_id.clone(),
        receiver_id: msg.receiver_id.clone(),
        content: msg.content.clone(),
        created_at,
        seq: conn.last_insert_rowid(),
    })
}

/// Messages between `a` and `b`, ascending by `(created_at, seq)`.
///
/// With a limit, returns the newest `limit` messages strictly older than
/// `page.before` (still ascending) and reports whether more remain.
pub fn get_conversation(
    conn: &Connection,
    a: &str,
    b: &str,
    page: PageRequest,
) -> Result<ConversationSlice, DatabaseError> {
    let before_millis = page.before.map(|c| c.created_at.timestamp_millis());
    let before_seq = page.before.map(|c| c.seq);

    let base = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE {PAIR_FILTER}
           AND (?3 IS NULL OR created_at < ?3 OR (created_at = ?3 AND seq < ?4))"
    );

    match page.limit {
        None => {
            let sql = format!("{base} ORDER BY created_at ASC, seq ASC");
            let messages = query_messages(conn, &sql, params![a, b, before_millis, before_seq])?;
            Ok(ConversationSlice {
                messages,
                has_more: false,
            })
        }
        Some(limit) => {
            // One extra row tells us whether an older page exists.
            let sql = format!("{base} ORDER BY created_at DESC, seq DESC LIMIT ?5");
            let mut messages = query_messages(
                conn,
                &sql,
                params![a, b, before_millis, before_seq, i64::from(limit) + 1],
            )?;
            let has_more = messages.len() > limit as usize;
            messages.truncate(limit as usize);
            messages.reverse();
            Ok(ConversationSlice { messages, has_more })
        }
    }
}

/// The single most recent message between `a` and `b`, in either direction.
pub fn get_latest_between(
    conn: &Connection,
    a: &str,
    b: &str,
) -> Result<Option<Message>, DatabaseError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {PAIR_FILTER}
         ORDER BY created_at DESC, seq DESC LIMIT 1"
    );
    Ok(query_messages(conn, &sql, params![a, b])?.into_iter().next())
}

/// Every identity that exchanged at least one message with `viewer`.
pub fn get_peers_of(conn: &Connection, viewer: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS peer
         FROM messages
         WHERE sender_id = ?1 OR receiver_id = ?1
         ORDER BY peer",
    )?;
    let rows = stmt.query_map(params![viewer], |row| row.get::<_, String>(0))?;

    let mut peers = Vec::new();
    for row in rows {
        peers.push(row?);
    }
    Ok(peers)
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(MessageRow {
            seq: row.get(0)?,
            id: row.get(1)?,
            sender_id: row.get(2)?,
            receiver_id: row.get(3)?,
            content: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(message_from_row(row?)?);
    }
    Ok(messages)
}

struct MessageRow {
    seq: i64,
    id: String,
    sender_id: String,
    receiver_id: String,
    content: String,
    created_at: i64,
}

fn message_from_row(row: MessageRow) -> Result<Message, DatabaseError> {
    let created_at = Utc
        .timestamp_millis_opt(row.created_at)
        .single()
        .ok_or(DatabaseError::InvalidTimestamp(row.created_at))?;

    Ok(Message {
        id: row.id,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        content: row.content,
        created_at,
        seq: row.seq,
    })
}
