use anyhow::{Context, Result};
use rusqlite::Connection;
use uuid::Uuid;

use crush_shared::{now_millis, FileRecord};

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        path: row.get("path")?,
        content: row.get("content")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Records a new snapshot of `path`, one version above the latest.
pub fn create_version(
    conn: &Connection,
    session_id: &str,
    path: &str,
    content: &str,
) -> Result<FileRecord> {
    let next_version: i64 = conn
        .prepare("SELECT COALESCE(MAX(version), 0) + 1 FROM files WHERE session_id = ?1 AND path = ?2")?
        .query_row(rusqlite::params![session_id, path], |row| row.get(0))
        .context("failed to compute file version")?;

    let now = now_millis();
    let id = format!("file_{}", Uuid::new_v4());
    conn.execute(
        "INSERT INTO files (id, session_id, path, content, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, session_id, path, content, next_version, now, now],
    )
    .context("failed to insert file record")?;

    get(conn, &id)?.context("failed to read created file record")
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<FileRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM files WHERE id = ?1")?;
    match stmt.query_row(rusqlite::params![id], row_to_file) {
        Ok(file) => Ok(Some(file)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("failed to read file record"),
    }
}

pub fn latest(conn: &Connection, session_id: &str, path: &str) -> Result<Option<FileRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM files WHERE session_id = ?1 AND path = ?2
         ORDER BY version DESC LIMIT 1",
    )?;
    match stmt.query_row(rusqlite::params![session_id, path], row_to_file) {
        Ok(file) => Ok(Some(file)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("failed to read latest file record"),
    }
}

pub fn list_by_session(conn: &Connection, session_id: &str) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM files WHERE session_id = ?1 ORDER BY path ASC, version ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![session_id], row_to_file)
        .context("failed to list file records")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to decode file records")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{sessions, Store};

    #[test]
    fn versions_increase_per_path() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn();
        let session = sessions::create(&conn, "t", None).unwrap();

        let v1 = create_version(&conn, &session.id, "/src/main.rs", "fn main() {}").unwrap();
        let v2 = create_version(&conn, &session.id, "/src/main.rs", "fn main() { run() }").unwrap();
        let other = create_version(&conn, &session.id, "/README.md", "# hi").unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(other.version, 1);

        let latest = latest(&conn, &session.id, "/src/main.rs").unwrap().unwrap();
        assert_eq!(latest.id, v2.id);
        assert_eq!(list_by_session(&conn, &session.id).unwrap().len(), 3);
    }
}
