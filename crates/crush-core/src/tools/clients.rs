//! Tools over the LSP/MCP client registries. Listing only observes the
//! agent's own state and skips the gate; restarting touches external
//! processes and goes through it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crush_shared::{CreatePermissionRequest, ToolCall, ToolInfo, ToolResponse};

use super::{Tool, ToolCtx, ToolError};
use crate::status::StatusRegistry;

pub const LIST_LSPS_TOOL_NAME: &str = "list_lsps";
pub const LIST_MCPS_TOOL_NAME: &str = "list_mcps";
pub const LSP_RESTART_TOOL_NAME: &str = "lsp_restart";
pub const MCP_RESTART_TOOL_NAME: &str = "mcp_restart";

#[derive(Debug, Deserialize)]
struct RestartParams {
    name: String,
}

pub struct ListLspsTool {
    status: Arc<StatusRegistry>,
}

pub struct ListMcpsTool {
    status: Arc<StatusRegistry>,
}

pub struct LspRestartTool {
    status: Arc<StatusRegistry>,
    workspace: String,
}

pub struct McpRestartTool {
    status: Arc<StatusRegistry>,
    workspace: String,
}

impl ListLspsTool {
    pub fn new(status: Arc<StatusRegistry>) -> Self {
        Self { status }
    }
}

impl ListMcpsTool {
    pub fn new(status: Arc<StatusRegistry>) -> Self {
        Self { status }
    }
}

impl LspRestartTool {
    pub fn new(status: Arc<StatusRegistry>, workspace: String) -> Self {
        Self { status, workspace }
    }
}

impl McpRestartTool {
    pub fn new(status: Arc<StatusRegistry>, workspace: String) -> Self {
        Self { status, workspace }
    }
}

#[async_trait]
impl Tool for ListLspsTool {
    fn name(&self) -> &str {
        LIST_LSPS_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: LIST_LSPS_TOOL_NAME.into(),
            description: "List the configured LSP clients with their current state and \
                          diagnostic counts. Use before lsp_restart to see what is available."
                .into(),
            parameters: json!({}),
            required: vec![],
        }
    }

    async fn run(&self, _ctx: &ToolCtx, _call: ToolCall) -> Result<ToolResponse, ToolError> {
        let lsps = self.status.lsps();
        if lsps.is_empty() {
            return Ok(ToolResponse::text("No LSP clients are configured."));
        }

        let mut out = format!("Configured LSP clients ({} total):\n\n", lsps.len());
        for lsp in lsps {
            out.push_str(&format!("- {} ({})\n", lsp.name, lsp.state));
            if lsp.diagnostic_count > 0 {
                out.push_str(&format!("  diagnostics: {}\n", lsp.diagnostic_count));
            }
            if let Some(error) = &lsp.error {
                out.push_str(&format!("  error: {error}\n"));
            }
        }
        Ok(ToolResponse::text(out))
    }
}

#[async_trait]
impl Tool for ListMcpsTool {
    fn name(&self) -> &str {
        LIST_MCPS_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: LIST_MCPS_TOOL_NAME.into(),
            description: "List the configured MCP servers with their current state. Use \
                          before mcp_restart to see what is available."
                .into(),
            parameters: json!({}),
            required: vec![],
        }
    }

    async fn run(&self, _ctx: &ToolCtx, _call: ToolCall) -> Result<ToolResponse, ToolError> {
        let mcps = self.status.mcps();
        if mcps.is_empty() {
            return Ok(ToolResponse::text("No MCP servers are configured."));
        }

        let mut out = format!("Configured MCP servers ({} total):\n\n", mcps.len());
        for mcp in mcps {
            out.push_str(&format!("- {} ({})\n", mcp.name, mcp.state));
            if let Some(error) = &mcp.error {
                out.push_str(&format!("  error: {error}\n"));
            }
        }
        Ok(ToolResponse::text(out))
    }
}

#[async_trait]
impl Tool for LspRestartTool {
    fn name(&self) -> &str {
        LSP_RESTART_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: LSP_RESTART_TOOL_NAME.into(),
            description: "Restart an LSP client by name. Use when a language server has \
                          crashed, stopped responding, or reports stale diagnostics."
                .into(),
            parameters: json!({
                "name": {"type": "string", "description": "The name of the LSP client to restart"}
            }),
            required: vec!["name".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: RestartParams = match serde_json::from_str(&call.input) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResponse::error(format!("error parsing parameters: {e}"))),
        };
        if params.name.is_empty() {
            return Ok(ToolResponse::error("LSP name is required"));
        }

        ctx.request_permission(CreatePermissionRequest {
            session_id: ctx.session_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: LSP_RESTART_TOOL_NAME.into(),
            description: format!("restart LSP client '{}'", params.name),
            action: "restart".into(),
            params: json!({"name": params.name.clone()}),
            path: self.workspace.clone(),
        })
        .await?;

        match self.status.restart_lsp(&params.name).await {
            Ok(()) => Ok(ToolResponse::text(format!(
                "Successfully restarted LSP client '{}'",
                params.name
            ))),
            Err(e) => Ok(ToolResponse::error(format!(
                "Failed to restart LSP client '{}': {e}",
                params.name
            ))),
        }
    }
}

#[async_trait]
impl Tool for McpRestartTool {
    fn name(&self) -> &str {
        MCP_RESTART_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: MCP_RESTART_TOOL_NAME.into(),
            description: "Restart an MCP server by name. Use when a server connection has \
                          failed or its tools stopped responding."
                .into(),
            parameters: json!({
                "name": {"type": "string", "description": "The name of the MCP server to restart"}
            }),
            required: vec!["name".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: RestartParams = match serde_json::from_str(&call.input) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResponse::error(format!("error parsing parameters: {e}"))),
        };
        if params.name.is_empty() {
            return Ok(ToolResponse::error("MCP name is required"));
        }

        ctx.request_permission(CreatePermissionRequest {
            session_id: ctx.session_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: MCP_RESTART_TOOL_NAME.into(),
            description: format!("restart MCP server '{}'", params.name),
            action: "restart".into(),
            params: json!({"name": params.name.clone()}),
            path: self.workspace.clone(),
        })
        .await?;

        match self.status.restart_mcp(&params.name).await {
            Ok(()) => Ok(ToolResponse::text(format!(
                "Successfully restarted MCP server '{}'",
                params.name
            ))),
            Err(e) => Ok(ToolResponse::error(format!(
                "Failed to restart MCP server '{}': {e}",
                params.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionService;
    use crate::services::EventBroker;
    use crate::status::ClientRestarter;
    use anyhow::Result as AnyResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct CountingRestarter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientRestarter for CountingRestarter {
        async fn restart(&self, _name: &str) -> AnyResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx(skip_permissions: bool) -> (ToolCtx, Arc<StatusRegistry>) {
        let broker = EventBroker::new();
        let status = Arc::new(StatusRegistry::new(broker.clone()));
        let ctx = ToolCtx::new(
            "sess_1".into(),
            "msg_1".into(),
            CancellationToken::new(),
            Arc::new(PermissionService::new(broker, skip_permissions)),
        );
        (ctx, status)
    }

    fn call(input: &str) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: String::new(),
            input: input.into(),
            finished: true,
        }
    }

    #[tokio::test]
    async fn list_reports_states_without_the_gate() {
        let (ctx, status) = ctx(false);
        status.update_lsp("rust-analyzer", "ready", None, 2).await;

        let tool = ListLspsTool::new(status.clone());
        let resp = tool.run(&ctx, call("{}")).await.unwrap();
        assert!(resp.content.contains("rust-analyzer (ready)"));
        assert!(resp.content.contains("diagnostics: 2"));

        let empty = ListMcpsTool::new(status).run(&ctx, call("{}")).await.unwrap();
        assert!(empty.content.contains("No MCP servers"));
    }

    #[tokio::test]
    async fn restart_goes_through_the_gate_and_hook() {
        let (ctx, status) = ctx(true); // yolo: the gate auto-grants
        status.update_mcp("filesystem", "ready", None).await;
        let restarter = Arc::new(CountingRestarter {
            calls: AtomicUsize::new(0),
        });
        status.set_mcp_restarter(restarter.clone());

        let tool = McpRestartTool::new(status, "/tmp/w".into());
        let resp = tool
            .run(&ctx, call(r#"{"name":"filesystem"}"#))
            .await
            .unwrap();
        assert!(!resp.is_error, "{}", resp.content);
        assert_eq!(restarter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_unknown_client_reports_inline_error() {
        let (ctx, status) = ctx(true);
        let tool = LspRestartTool::new(status, "/tmp/w".into());
        let resp = tool.run(&ctx, call(r#"{"name":"gopls"}"#)).await.unwrap();
        assert!(resp.is_error);
        assert!(resp.content.contains("unknown LSP client"));
    }
}
