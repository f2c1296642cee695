//! The uniform tool surface the agent dispatches against.
//!
//! A tool that mutates state or reads sensitive paths must put itself behind
//! the permission gate via [`ToolCtx::request_permission`] before acting;
//! tools that only observe the agent's own data model (the todo tools) skip
//! it.

pub mod clients;
pub mod context;
pub mod todo;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crush_shared::{CreatePermissionRequest, ToolCall, ToolInfo, ToolResponse};

use crate::permission::PermissionService;

/// Why a tool run terminated abnormally. Ordinary tool failures (bad input,
/// command failed) are NOT errors here; they come back as
/// `ToolResponse{is_error}` so the model can recover on the next turn.
#[derive(Debug)]
pub enum ToolError {
    PermissionDenied,
    Canceled,
    Fatal(anyhow::Error),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Canceled => write!(f, "canceled"),
            Self::Fatal(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<anyhow::Error> for ToolError {
    fn from(e: anyhow::Error) -> Self {
        Self::Fatal(e)
    }
}

/// Per-invocation context handed to a tool: which session and assistant
/// message it runs for, the turn's cancellation token, and the gate.
#[derive(Clone)]
pub struct ToolCtx {
    pub session_id: String,
    pub message_id: String,
    pub cancel: CancellationToken,
    permissions: Arc<PermissionService>,
}

impl ToolCtx {
    pub fn new(
        session_id: String,
        message_id: String,
        cancel: CancellationToken,
        permissions: Arc<PermissionService>,
    ) -> Self {
        Self {
            session_id,
            message_id,
            cancel,
            permissions,
        }
    }

    /// Blocks on the permission gate. Returns `Err(PermissionDenied)` when
    /// the user says no and `Err(Canceled)` when the turn is canceled while
    /// waiting.
    pub async fn request_permission(&self, req: CreatePermissionRequest) -> Result<(), ToolError> {
        if self.permissions.request(req, &self.cancel).await {
            Ok(())
        } else if self.cancel.is_cancelled() {
            Err(ToolError::Canceled)
        } else {
            Err(ToolError::PermissionDenied)
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn info(&self) -> ToolInfo;
    async fn run(&self, ctx: &ToolCtx, call: ToolCall) -> Result<ToolResponse, ToolError>;
}

/// Lookup table of tools available to the agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|t| t.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
