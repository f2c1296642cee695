//! On-demand project context: loads convention files (the paths configured
//! under `options.context_paths`) instead of carrying them in every request.
//! Reads go through the gate and every file read is snapshotted for the
//! session's history.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

use crush_shared::{CreatePermissionRequest, ToolCall, ToolInfo, ToolResponse};

use super::{Tool, ToolCtx, ToolError};
use crate::services::FileService;

pub const CONTEXT_TOOL_NAME: &str = "context";

/// Cap per loaded file so one giant document cannot blow the context window.
const MAX_FILE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
struct ContextParams {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    query: String,
}

pub struct ContextTool {
    files: FileService,
    workspace: String,
    context_paths: Vec<String>,
}

impl ContextTool {
    pub fn new(files: FileService, workspace: String, context_paths: Vec<String>) -> Self {
        Self {
            files,
            workspace,
            context_paths,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            Path::new(&self.workspace).join(candidate)
        }
    }
}

#[async_trait]
impl Tool for ContextTool {
    fn name(&self) -> &str {
        CONTEXT_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: CONTEXT_TOOL_NAME.into(),
            description: "Load project context files (conventions, instructions, rules) on \
                          demand instead of carrying them in every request. Without arguments \
                          the configured context paths are loaded; pass paths to load specific \
                          files, or a query to keep only matching sections."
                .into(),
            parameters: json!({
                "paths": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Specific context paths to load (defaults to the configured ones)"
                },
                "query": {
                    "type": "string",
                    "description": "Filter content to sections containing this string"
                }
            }),
            required: vec![],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: ContextParams = if call.input.trim().is_empty() {
            ContextParams::default()
        } else {
            match serde_json::from_str(&call.input) {
                Ok(p) => p,
                Err(e) => return Ok(ToolResponse::error(format!("error parsing parameters: {e}"))),
            }
        };

        let paths = if params.paths.is_empty() {
            self.context_paths.clone()
        } else {
            params.paths.clone()
        };
        if paths.is_empty() {
            return Ok(ToolResponse::text(
                "No context paths configured. Set options.context_paths or pass paths explicitly.",
            ));
        }

        ctx.request_permission(CreatePermissionRequest {
            session_id: ctx.session_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: CONTEXT_TOOL_NAME.into(),
            description: format!("read {} project context file(s)", paths.len()),
            action: "read".into(),
            params: json!({"paths": paths.clone(), "query": params.query.clone()}),
            path: self.workspace.clone(),
        })
        .await?;

        let mut sections = Vec::new();
        let mut missing = Vec::new();

        for path in &paths {
            let resolved = self.resolve(path);
            let readable = std::fs::metadata(&resolved)
                .map(|m| m.is_file() && m.len() <= MAX_FILE_BYTES)
                .unwrap_or(false);
            if !readable {
                missing.push(path.clone());
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&resolved) else {
                missing.push(path.clone());
                continue;
            };

            let shown = if params.query.is_empty() {
                content.clone()
            } else {
                filter_sections(&content, &params.query)
            };
            if shown.is_empty() {
                continue;
            }

            // Snapshot what the agent read for the session's file history.
            if let Err(e) = self
                .files
                .create_version(&ctx.session_id, &resolved.to_string_lossy(), &content)
                .await
            {
                tracing::debug!(path, error = %e, "failed to record context snapshot");
            }

            sections.push(format!("## {path}\n\n{shown}"));
        }

        if sections.is_empty() {
            let mut message = "No context content found".to_string();
            if !params.query.is_empty() {
                message.push_str(&format!(" for query {:?}", params.query));
            }
            if !missing.is_empty() {
                message.push_str(&format!(" (unreadable: {})", missing.join(", ")));
            }
            return Ok(ToolResponse::text(message + "."));
        }

        let mut out = sections.join("\n\n");
        if !missing.is_empty() {
            out.push_str(&format!("\n\n(unreadable: {})", missing.join(", ")));
        }
        Ok(ToolResponse::text(out))
    }
}

/// Keeps paragraphs containing the query (case-insensitive).
fn filter_sections(content: &str, query: &str) -> String {
    let needle = query.to_lowercase();
    content
        .split("\n\n")
        .filter(|section| section.to_lowercase().contains(&needle))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionService;
    use crate::services::{EventBroker, FileService};
    use crate::store::Store;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn fixture(workspace: &Path, context_paths: Vec<String>) -> (ContextTool, ToolCtx, FileService, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = {
            let conn = store.conn();
            crate::store::sessions::create(&conn, "ctx", None).unwrap()
        };
        let broker = EventBroker::new();
        let files = FileService::new(store, broker.clone());
        let tool = ContextTool::new(
            files.clone(),
            workspace.to_string_lossy().to_string(),
            context_paths,
        );
        let ctx = ToolCtx::new(
            session.id.clone(),
            "msg_1".into(),
            CancellationToken::new(),
            Arc::new(PermissionService::new(broker, true)),
        );
        (tool, ctx, files, session.id)
    }

    fn call(input: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: String::new(),
            input: input.to_string(),
            finished: true,
        }
    }

    #[tokio::test]
    async fn loads_configured_paths_and_snapshots_them() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("RULES.md"), "Always write tests.\n\nUse anyhow.").unwrap();
        let (tool, ctx, files, session_id) =
            fixture(dir.path(), vec!["RULES.md".into()]);

        let resp = tool.run(&ctx, call(serde_json::json!({}))).await.unwrap();
        assert!(resp.content.contains("## RULES.md"));
        assert!(resp.content.contains("Always write tests."));

        let history = files.list(&session_id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].path.ends_with("RULES.md"));
        assert_eq!(history[0].version, 1);
    }

    #[tokio::test]
    async fn query_filters_to_matching_sections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("RULES.md"),
            "Formatting: rustfmt.\n\nTesting: cover edge cases.",
        )
        .unwrap();
        let (tool, ctx, _, _) = fixture(dir.path(), vec!["RULES.md".into()]);

        let resp = tool
            .run(&ctx, call(serde_json::json!({"query": "testing"})))
            .await
            .unwrap();
        assert!(resp.content.contains("Testing: cover edge cases."));
        assert!(!resp.content.contains("Formatting"));
    }

    #[tokio::test]
    async fn missing_files_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, ctx, _, _) = fixture(dir.path(), vec!["GONE.md".into()]);

        let resp = tool.run(&ctx, call(serde_json::json!({}))).await.unwrap();
        assert!(!resp.is_error);
        assert!(resp.content.contains("unreadable: GONE.md"));
    }

    #[tokio::test]
    async fn no_paths_configured_is_a_hint() {
        let dir = tempfile::tempdir().unwrap();
        let (tool, ctx, _, _) = fixture(dir.path(), vec![]);
        let resp = tool.run(&ctx, call(serde_json::json!({}))).await.unwrap();
        assert!(resp.content.contains("No context paths configured"));
    }
}
