use anyhow::{Context, Result};
use rusqlite::Connection;
use uuid::Uuid;

use crush_shared::{now_millis, Todo, TodoStatus};

fn row_to_todo(row: &rusqlite::Row) -> rusqlite::Result<(Todo, String)> {
    let status: String = row.get("status")?;
    Ok((
        Todo {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            content: row.get("content")?,
            status: TodoStatus::Pending, // patched by caller from the raw string
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        },
        status,
    ))
}

fn decode((mut todo, status): (Todo, String)) -> Result<Todo> {
    todo.status = TodoStatus::parse(&status)
        .with_context(|| format!("unknown todo status {status:?} in row {}", todo.id))?;
    Ok(todo)
}

pub fn create(conn: &Connection, session_id: &str, content: &str, status: TodoStatus) -> Result<Todo> {
    let now = now_millis();
    let id = format!("todo_{}", Uuid::new_v4());
    conn.execute(
        "INSERT INTO todos (id, session_id, content, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, session_id, content, status.as_str(), now, now],
    )
    .context("failed to insert todo")?;
    get(conn, &id)?.context("failed to read created todo")
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Todo>> {
    let mut stmt = conn.prepare("SELECT * FROM todos WHERE id = ?1")?;
    match stmt.query_row(rusqlite::params![id], row_to_todo) {
        Ok(raw) => Ok(Some(decode(raw)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("failed to read todo"),
    }
}

pub fn list_by_session(
    conn: &Connection,
    session_id: &str,
    status: Option<TodoStatus>,
) -> Result<Vec<Todo>> {
    let mut todos = Vec::new();
    match status {
        Some(status) => {
            let mut stmt = conn.prepare(
                "SELECT * FROM todos WHERE session_id = ?1 AND status = ?2
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![session_id, status.as_str()], row_to_todo)
                .context("failed to list todos")?;
            for row in rows {
                todos.push(decode(row.context("failed to read todo row")?)?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT * FROM todos WHERE session_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![session_id], row_to_todo)
                .context("failed to list todos")?;
            for row in rows {
                todos.push(decode(row.context("failed to read todo row")?)?);
            }
        }
    }
    Ok(todos)
}

pub fn update(conn: &Connection, id: &str, content: &str, status: TodoStatus) -> Result<Option<Todo>> {
    let affected = conn
        .execute(
            "UPDATE todos SET content = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![content, status.as_str(), now_millis(), id],
        )
        .context("failed to update todo")?;
    if affected == 0 {
        return Ok(None);
    }
    get(conn, id)
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM todos WHERE id = ?1", rusqlite::params![id])
        .context("failed to delete todo")?;
    Ok(affected > 0)
}
