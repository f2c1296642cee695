use serde::{Deserialize, Serialize};

use crate::agent::AgentEvent;
use crate::file::FileRecord;
use crate::message::Message;
use crate::permission::{PermissionNotification, PermissionRequest};
use crate::session::Session;

/// Lifecycle classification of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// State-change notification from an LSP client. The core never talks to
/// language servers itself; it only forwards what the client stack reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LspEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub diagnostic_count: i64,
}

/// State-change notification from an MCP server connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Everything that can travel over an instance's event stream, discriminated
/// by the wire tag the SSE envelope carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    LspEvent(LspEvent),
    McpEvent(McpEvent),
    PermissionRequest(PermissionRequest),
    PermissionNotification(PermissionNotification),
    Message(Message),
    Session(Session),
    File(FileRecord),
    AgentEvent(AgentEvent),
}

/// The SSE frame body: `{"type": <kind>, "payload": {"type": <tag>, "payload": ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T> {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: T,
}

impl<T> Event<T> {
    pub fn new(kind: EventKind, payload: T) -> Self {
        Self { kind, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentPart, MessageRole, TextContent};

    #[test]
    fn envelope_round_trip() {
        let ev = Event::new(
            EventKind::Created,
            EventPayload::Message(Message {
                id: "msg_1".into(),
                session_id: "sess_1".into(),
                role: MessageRole::User,
                parts: vec![ContentPart::Text(TextContent { text: "hi".into() })],
                model: String::new(),
                provider: String::new(),
                created_at: 1,
                updated_at: 1,
            }),
        );

        let json = serde_json::to_string(&ev).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "created");
        assert_eq!(v["payload"]["type"], "message");
        assert_eq!(v["payload"]["payload"]["id"], "msg_1");

        let back: Event<EventPayload> = serde_json::from_str(&json).unwrap();
        match back.payload {
            EventPayload::Message(m) => assert_eq!(m.id, "msg_1"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn permission_request_tag() {
        let ev = Event::new(
            EventKind::Created,
            EventPayload::PermissionRequest(PermissionRequest::default()),
        );
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["payload"]["type"], "permission_request");
    }
}
