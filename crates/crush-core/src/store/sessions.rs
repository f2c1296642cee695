use anyhow::{Context, Result};
use rusqlite::Connection;
use uuid::Uuid;

use crush_shared::{now_millis, Session};

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get("id")?,
        parent_session_id: row.get("parent_session_id")?,
        title: row.get("title")?,
        message_count: row.get("message_count")?,
        prompt_tokens: row.get("prompt_tokens")?,
        completion_tokens: row.get("completion_tokens")?,
        summary_message_id: row.get("summary_message_id")?,
        cost: row.get("cost")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn create(conn: &Connection, title: &str, parent_session_id: Option<&str>) -> Result<Session> {
    let now = now_millis();
    let id = format!("sess_{}", Uuid::new_v4());

    conn.execute(
        "INSERT INTO sessions (id, parent_session_id, title, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![id, parent_session_id, title, now, now],
    )
    .context("failed to insert session")?;

    get(conn, &id)?.context("failed to read created session")
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Session>> {
    let mut stmt = conn.prepare("SELECT * FROM sessions WHERE id = ?1")?;
    match stmt.query_row(rusqlite::params![id], row_to_session) {
        Ok(session) => Ok(Some(session)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("failed to read session"),
    }
}

pub fn list(conn: &Connection) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY created_at DESC, id DESC")?;
    let rows = stmt
        .query_map([], row_to_session)
        .context("failed to list sessions")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode sessions")
}

/// Persists the mutable fields of a session. Bumps `updated_at`.
pub fn save(conn: &Connection, session: &Session) -> Result<Session> {
    let now = now_millis();
    conn.execute(
        "UPDATE sessions
         SET title = ?1,
             prompt_tokens = ?2,
             completion_tokens = ?3,
             summary_message_id = ?4,
             cost = ?5,
             updated_at = ?6
         WHERE id = ?7",
        rusqlite::params![
            session.title,
            session.prompt_tokens,
            session.completion_tokens,
            session.summary_message_id,
            session.cost,
            now,
            session.id
        ],
    )
    .context("failed to update session")?;

    get(conn, &session.id)?.context("session vanished during save")
}

pub fn bump_message_count(conn: &Connection, id: &str, delta: i64) -> Result<()> {
    conn.execute(
        "UPDATE sessions
         SET message_count = MAX(0, message_count + ?1), updated_at = ?2
         WHERE id = ?3",
        rusqlite::params![delta, now_millis(), id],
    )
    .context("failed to bump message count")?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![id])
        .context("failed to delete session")?;
    Ok(affected > 0)
}
