use serde::{Deserialize, Serialize};

/// Snapshot of a file the agent has read or written, used for diff/history.
/// Versions are per `(session_id, path)` and increase monotonically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub session_id: String,
    pub path: String,
    pub content: String,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}
