use serde::{Deserialize, Serialize};

use crate::message::{Attachment, Message};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    Response,
    Error,
    Summarize,
    Queued,
}

/// Terminal and progress notifications from the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: AgentEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub progress: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

impl AgentEvent {
    pub fn response(message: Message) -> Self {
        Self {
            kind: AgentEventKind::Response,
            message: Some(message),
            error: None,
            session_id: String::new(),
            progress: String::new(),
            done: false,
        }
    }

    pub fn error(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: AgentEventKind::Error,
            message: None,
            error: Some(error.into()),
            session_id: session_id.into(),
            progress: String::new(),
            done: false,
        }
    }

    pub fn queued(session_id: impl Into<String>) -> Self {
        Self {
            kind: AgentEventKind::Queued,
            message: None,
            error: None,
            session_id: session_id.into(),
            progress: String::new(),
            done: false,
        }
    }

    pub fn summarize(session_id: impl Into<String>, progress: impl Into<String>, done: bool) -> Self {
        Self {
            kind: AgentEventKind::Summarize,
            message: None,
            error: None,
            session_id: session_id.into(),
            progress: progress.into(),
            done,
        }
    }
}

/// `GET .../agent` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub is_busy: bool,
    pub model: crate::instance::ModelSummary,
}

/// `POST .../agent` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub session_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// A session together with its live busy flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    #[serde(flatten)]
    pub session: Session,
    pub is_busy: bool,
}
