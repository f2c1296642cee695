use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Canceled,
    Error,
    PermissionDenied,
    /// Providers occasionally report reasons we don't model.
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub thinking: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub finished_at: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageUrlContent {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryContent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// An assistant's request to invoke a tool. `input` accumulates streamed
/// JSON fragments and is only parseable once `finished` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub finished: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finish {
    pub reason: FinishReason,
    pub time: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

/// One element of a message body. Serialized as `{"type": <tag>, "data": {..}}`
/// so the persisted form round-trips exactly; an unknown tag is a decode
/// error, never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentPart {
    Reasoning(ReasoningContent),
    Text(TextContent),
    ImageUrl(ImageUrlContent),
    Binary(BinaryContent),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    Finish(Finish),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageParams {
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub parts: Vec<ContentPart>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    pub fn content(&self) -> &str {
        self.parts
            .iter()
            .find_map(|p| match p {
                ContentPart::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn reasoning(&self) -> Option<&ReasoningContent> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Reasoning(r) => Some(r),
            _ => None,
        })
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    /// Tool calls whose streamed input is complete and can be dispatched.
    pub fn finished_tool_calls(&self) -> Vec<&ToolCall> {
        self.tool_calls().into_iter().filter(|tc| tc.finished).collect()
    }

    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult(tr) => Some(tr),
                _ => None,
            })
            .collect()
    }

    pub fn finish_part(&self) -> Option<&Finish> {
        self.parts.iter().find_map(|p| match p {
            ContentPart::Finish(f) => Some(f),
            _ => None,
        })
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_part().map(|f| f.reason)
    }

    pub fn is_finished(&self) -> bool {
        self.finish_part().is_some()
    }

    /// A message is "thinking" while it streams reasoning before any text.
    pub fn is_thinking(&self) -> bool {
        self.reasoning().is_some_and(|r| !r.thinking.is_empty())
            && self.content().is_empty()
            && !self.is_finished()
    }

    pub fn append_content(&mut self, delta: &str) {
        for part in &mut self.parts {
            if let ContentPart::Text(t) = part {
                t.text.push_str(delta);
                return;
            }
        }
        self.parts.push(ContentPart::Text(TextContent {
            text: delta.to_string(),
        }));
    }

    pub fn append_reasoning(&mut self, delta: &str) {
        for part in &mut self.parts {
            if let ContentPart::Reasoning(r) = part {
                r.thinking.push_str(delta);
                return;
            }
        }
        self.parts.push(ContentPart::Reasoning(ReasoningContent {
            thinking: delta.to_string(),
            started_at: now_millis(),
            ..Default::default()
        }));
    }

    pub fn append_reasoning_signature(&mut self, delta: &str) {
        for part in &mut self.parts {
            if let ContentPart::Reasoning(r) = part {
                r.signature.push_str(delta);
                return;
            }
        }
        self.parts.push(ContentPart::Reasoning(ReasoningContent {
            signature: delta.to_string(),
            ..Default::default()
        }));
    }

    pub fn finish_thinking(&mut self) {
        for part in &mut self.parts {
            if let ContentPart::Reasoning(r) = part {
                if r.finished_at == 0 {
                    r.finished_at = now_millis();
                }
                return;
            }
        }
    }

    /// Adds or replaces a tool call by id.
    pub fn add_tool_call(&mut self, tc: ToolCall) {
        for part in &mut self.parts {
            if let ContentPart::ToolCall(existing) = part {
                if existing.id == tc.id {
                    *existing = tc;
                    return;
                }
            }
        }
        self.parts.push(ContentPart::ToolCall(tc));
    }

    pub fn append_tool_call_input(&mut self, tool_call_id: &str, delta: &str) {
        for part in &mut self.parts {
            if let ContentPart::ToolCall(tc) = part {
                if tc.id == tool_call_id {
                    tc.input.push_str(delta);
                    return;
                }
            }
        }
    }

    pub fn finish_tool_call(&mut self, tool_call_id: &str) {
        for part in &mut self.parts {
            if let ContentPart::ToolCall(tc) = part {
                if tc.id == tool_call_id {
                    tc.finished = true;
                    return;
                }
            }
        }
    }

    pub fn set_tool_calls(&mut self, calls: Vec<ToolCall>) {
        self.parts.retain(|p| !matches!(p, ContentPart::ToolCall(_)));
        self.parts
            .extend(calls.into_iter().map(ContentPart::ToolCall));
    }

    pub fn add_tool_result(&mut self, tr: ToolResult) {
        self.parts.push(ContentPart::ToolResult(tr));
    }

    /// Appends a finish part, replacing any existing one: a message carries
    /// at most one terminal marker.
    pub fn add_finish(&mut self, reason: FinishReason, message: String, details: String) {
        self.parts.retain(|p| !matches!(p, ContentPart::Finish(_)));
        self.parts.push(ContentPart::Finish(Finish {
            reason,
            time: now_millis(),
            message,
            details,
        }));
    }
}

/// A user-provided file attached to a prompt. `content` travels base64-encoded
/// on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

impl Attachment {
    pub fn encoded_content(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(parts: Vec<ContentPart>) -> Message {
        Message {
            id: "msg_1".into(),
            session_id: "sess_1".into(),
            role: MessageRole::Assistant,
            parts,
            model: "test".into(),
            provider: "mock".into(),
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn parts_round_trip_all_variants() {
        let parts = vec![
            ContentPart::Reasoning(ReasoningContent {
                thinking: "hmm".into(),
                signature: "sig".into(),
                started_at: 10,
                finished_at: 20,
            }),
            ContentPart::Text(TextContent { text: "hi".into() }),
            ContentPart::ImageUrl(ImageUrlContent {
                url: "https://example.com/x.png".into(),
                detail: "low".into(),
            }),
            ContentPart::Binary(BinaryContent {
                path: "/tmp/a.bin".into(),
                mime_type: "application/octet-stream".into(),
                data: vec![0, 1, 2, 255],
            }),
            ContentPart::ToolCall(ToolCall {
                id: "t1".into(),
                name: "bash".into(),
                input: r#"{"command":"echo hi"}"#.into(),
                finished: true,
            }),
            ContentPart::ToolResult(ToolResult {
                tool_call_id: "t1".into(),
                name: "bash".into(),
                content: "hi".into(),
                metadata: String::new(),
                is_error: false,
            }),
            ContentPart::Finish(Finish {
                reason: FinishReason::EndTurn,
                time: 42,
                message: String::new(),
                details: String::new(),
            }),
        ];

        let encoded = serde_json::to_string(&parts).unwrap();
        let decoded: Vec<ContentPart> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parts, decoded);
    }

    #[test]
    fn parts_use_type_data_envelope() {
        let part = ContentPart::Text(TextContent { text: "x".into() });
        let v: serde_json::Value = serde_json::to_value(&part).unwrap();
        assert_eq!(v["type"], "text");
        assert_eq!(v["data"]["text"], "x");
    }

    #[test]
    fn unknown_part_tag_is_rejected() {
        let raw = r#"[{"type":"hologram","data":{}}]"#;
        let res: Result<Vec<ContentPart>, _> = serde_json::from_str(raw);
        assert!(res.is_err());
    }

    #[test]
    fn add_finish_replaces_existing() {
        let mut m = message_with(vec![]);
        m.add_finish(FinishReason::ToolUse, String::new(), String::new());
        m.add_finish(FinishReason::EndTurn, String::new(), String::new());
        let finishes: Vec<_> = m
            .parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Finish(_)))
            .collect();
        assert_eq!(finishes.len(), 1);
        assert_eq!(m.finish_reason(), Some(FinishReason::EndTurn));
    }

    #[test]
    fn append_content_accumulates_single_text_part() {
        let mut m = message_with(vec![]);
        m.append_content("hel");
        m.append_content("lo");
        assert_eq!(m.content(), "hello");
        assert_eq!(m.parts.len(), 1);
    }

    #[test]
    fn tool_call_streaming_lifecycle() {
        let mut m = message_with(vec![]);
        m.add_tool_call(ToolCall {
            id: "t1".into(),
            name: "bash".into(),
            input: String::new(),
            finished: false,
        });
        m.append_tool_call_input("t1", r#"{"command":"#);
        m.append_tool_call_input("t1", r#""echo hi"}"#);
        assert!(m.finished_tool_calls().is_empty());
        m.finish_tool_call("t1");
        let calls = m.finished_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input, r#"{"command":"echo hi"}"#);
    }

    #[test]
    fn is_thinking_requires_reasoning_without_text_or_finish() {
        let mut m = message_with(vec![]);
        m.append_reasoning("pondering");
        assert!(m.is_thinking());
        m.append_content("answer");
        assert!(!m.is_thinking());
    }

    #[test]
    fn attachment_content_is_base64_on_the_wire() {
        let a = Attachment {
            file_path: "/tmp/x".into(),
            file_name: "x".into(),
            mime_type: "text/plain".into(),
            content: b"hello".to_vec(),
        };
        let v: serde_json::Value = serde_json::to_value(&a).unwrap();
        assert_eq!(v["content"], "aGVsbG8=");
        let back: Attachment = serde_json::from_value(v).unwrap();
        assert_eq!(back.content, b"hello");
    }
}
