use anyhow::{Context, Result};
use rusqlite::Connection;
use uuid::Uuid;

use crush_shared::{now_millis, ContentPart, Message, MessageRole};

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn role_from_str(s: &str) -> Result<MessageRole> {
    match s {
        "system" => Ok(MessageRole::System),
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        "tool" => Ok(MessageRole::Tool),
        other => anyhow::bail!("unknown message role {other:?}"),
    }
}

struct RawMessage {
    id: String,
    session_id: String,
    role: String,
    parts: String,
    model: String,
    provider: String,
    created_at: i64,
    updated_at: i64,
}

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        role: row.get("role")?,
        parts: row.get("parts")?,
        model: row.get("model")?,
        provider: row.get("provider")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Strict decode: a row whose parts carry an unknown tag is an error, never
/// silently dropped.
fn decode(raw: RawMessage) -> Result<Message> {
    let parts: Vec<ContentPart> = serde_json::from_str(&raw.parts)
        .with_context(|| format!("invalid message parts in row {}", raw.id))?;
    Ok(Message {
        id: raw.id,
        session_id: raw.session_id,
        role: role_from_str(&raw.role)?,
        parts,
        model: raw.model,
        provider: raw.provider,
        created_at: raw.created_at,
        updated_at: raw.updated_at,
    })
}

pub fn create(
    conn: &Connection,
    session_id: &str,
    role: MessageRole,
    parts: &[ContentPart],
    model: &str,
    provider: &str,
) -> Result<Message> {
    let now = now_millis();
    let id = format!("msg_{}", Uuid::new_v4());
    let encoded = serde_json::to_string(parts).context("failed to encode message parts")?;

    conn.execute(
        "INSERT INTO messages (id, session_id, role, parts, model, provider, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            id,
            session_id,
            role_to_str(role),
            encoded,
            model,
            provider,
            now,
            now
        ],
    )
    .context("failed to insert message")?;

    get(conn, &id)?.context("failed to read created message")
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let mut stmt = conn.prepare("SELECT * FROM messages WHERE id = ?1")?;
    match stmt.query_row(rusqlite::params![id], row_to_raw) {
        Ok(raw) => Ok(Some(decode(raw)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("failed to read message"),
    }
}

/// Messages of a session in insertion order (`created_at` is non-decreasing;
/// rowid breaks same-millisecond ties).
pub fn list_by_session(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![session_id], row_to_raw)
        .context("failed to list messages")?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(decode(row.context("failed to read message row")?)?);
    }
    Ok(messages)
}

pub fn update_parts(conn: &Connection, message: &Message) -> Result<Message> {
    let encoded = serde_json::to_string(&message.parts).context("failed to encode message parts")?;
    conn.execute(
        "UPDATE messages SET parts = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![encoded, now_millis(), message.id],
    )
    .context("failed to update message")?;
    get(conn, &message.id)?.context("message vanished during update")
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM messages WHERE id = ?1", rusqlite::params![id])
        .context("failed to delete message")?;
    Ok(affected > 0)
}
