//! Wire and protocol types shared by the crush server, client, and core.
//!
//! Everything here is plain data: serde-serializable shapes that cross the
//! local RPC boundary or land in the per-workspace database. Behavior lives
//! in `crush-core`.

pub mod agent;
pub mod canonical;
pub mod event;
pub mod file;
pub mod host;
pub mod instance;
pub mod message;
pub mod permission;
pub mod session;
pub mod todo;
pub mod tool;
pub mod version;

pub use agent::{AgentEvent, AgentEventKind, AgentInfo, AgentMessage, AgentSession};
pub use event::{Event, EventKind, EventPayload, LspEvent, McpEvent};
pub use file::FileRecord;
pub use message::{
    Attachment, ContentPart, CreateMessageParams, Finish, FinishReason, Message, MessageRole,
    ToolCall, ToolResult,
};
pub use permission::{
    CreatePermissionRequest, PermissionAction, PermissionGrant, PermissionNotification,
    PermissionRequest, PermissionSkipRequest,
};
pub use session::Session;
pub use todo::{Todo, TodoStatus};
pub use tool::{ToolInfo, ToolResponse, ToolResponseKind};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix milliseconds. All persisted timestamps use this.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}
