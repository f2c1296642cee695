//! Task-tracking tools. These only touch the agent's own data model, so they
//! bypass the permission gate.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crush_shared::{ToolCall, ToolInfo, ToolResponse, TodoStatus};

use super::{Tool, ToolCtx, ToolError};
use crate::services::TodoService;

pub const TODO_WRITE_TOOL_NAME: &str = "todo_write";
pub const TODO_LIST_TOOL_NAME: &str = "todo_list";
pub const TODO_DELETE_TOOL_NAME: &str = "todo_delete";

#[derive(Debug, Deserialize)]
struct TodoWriteParams {
    todos: Vec<TodoItemParams>,
}

#[derive(Debug, Deserialize)]
struct TodoItemParams {
    #[serde(default)]
    id: String,
    content: String,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct TodoListParams {
    #[serde(default)]
    filter_status: String,
}

#[derive(Debug, Deserialize)]
struct TodoDeleteParams {
    ids: Vec<String>,
}

pub struct TodoWriteTool {
    todos: TodoService,
}

pub struct TodoListTool {
    todos: TodoService,
}

pub struct TodoDeleteTool {
    todos: TodoService,
}

impl TodoWriteTool {
    pub fn new(todos: TodoService) -> Self {
        Self { todos }
    }
}

impl TodoListTool {
    pub fn new(todos: TodoService) -> Self {
        Self { todos }
    }
}

impl TodoDeleteTool {
    pub fn new(todos: TodoService) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        TODO_WRITE_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: TODO_WRITE_TOOL_NAME.into(),
            description: "Create or update TODO task items to track your planned course of \
                          action and progress. Omit the id for new items; include it to update. \
                          Status is one of: pending, in_progress, completed."
                .into(),
            parameters: json!({
                "todos": {
                    "type": "array",
                    "description": "Array of TODO items to create or update",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string", "description": "ID of existing TODO for updates (omit for new TODOs)"},
                            "content": {"type": "string", "description": "Description of what needs to be accomplished"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]}
                        },
                        "required": ["content", "status"]
                    }
                }
            }),
            required: vec!["todos".into()],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: TodoWriteParams = match serde_json::from_str(&call.input) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResponse::error(format!("error parsing parameters: {e}"))),
        };
        if params.todos.is_empty() {
            return Ok(ToolResponse::error("todos array cannot be empty"));
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for item in params.todos {
            if item.content.is_empty() {
                errors.push("TODO content cannot be empty".to_string());
                continue;
            }
            let Some(status) = TodoStatus::parse(&item.status) else {
                errors.push(format!(
                    "invalid status '{}'. Must be: pending, in_progress, or completed",
                    item.status
                ));
                continue;
            };

            if item.id.is_empty() {
                match self.todos.create(&ctx.session_id, &item.content, status) {
                    Ok(todo) => results.push(format!(
                        "Created TODO '{}' with status '{}' (ID: {})",
                        todo.content,
                        todo.status.as_str(),
                        todo.id
                    )),
                    Err(e) => errors.push(format!("failed to create TODO: {e}")),
                }
            } else {
                match self.todos.update(&item.id, &item.content, status) {
                    Ok(Some(todo)) => results.push(format!(
                        "Updated TODO '{}' with status '{}' (ID: {})",
                        todo.content,
                        todo.status.as_str(),
                        todo.id
                    )),
                    Ok(None) => errors.push(format!("TODO {} not found", item.id)),
                    Err(e) => errors.push(format!("failed to update TODO {}: {e}", item.id)),
                }
            }
        }

        Ok(combine(results, errors))
    }
}

#[async_trait]
impl Tool for TodoListTool {
    fn name(&self) -> &str {
        TODO_LIST_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: TODO_LIST_TOOL_NAME.into(),
            description: "List TODO task items for the current session, optionally filtered \
                          by status."
                .into(),
            parameters: json!({
                "filter_status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed"],
                    "description": "Optional filter by status"
                }
            }),
            required: vec![],
        }
    }

    async fn run(&self, ctx: &ToolCtx, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: TodoListParams = if call.input.trim().is_empty() {
            TodoListParams::default()
        } else {
            match serde_json::from_str(&call.input) {
                Ok(p) => p,
                Err(e) => return Ok(ToolResponse::error(format!("error parsing parameters: {e}"))),
            }
        };

        let filter = if params.filter_status.is_empty() {
            None
        } else {
            match TodoStatus::parse(&params.filter_status) {
                Some(status) => Some(status),
                None => {
                    return Ok(ToolResponse::error(format!(
                        "invalid filter_status '{}'. Must be: pending, in_progress, or completed",
                        params.filter_status
                    )))
                }
            }
        };

        let todos = self
            .todos
            .list(&ctx.session_id, filter)
            .map_err(ToolError::Fatal)?;

        if todos.is_empty() {
            return Ok(ToolResponse::text("No TODOs found for the current session."));
        }

        let mut out = format!("TODOs for the current session ({} total):\n\n", todos.len());
        for todo in todos {
            out.push_str(&format!(
                "[{}] {} (ID: {})\n",
                todo.status.as_str(),
                todo.content,
                todo.id
            ));
        }
        Ok(ToolResponse::text(out))
    }
}

#[async_trait]
impl Tool for TodoDeleteTool {
    fn name(&self) -> &str {
        TODO_DELETE_TOOL_NAME
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: TODO_DELETE_TOOL_NAME.into(),
            description: "Remove TODO task items that are no longer needed. Deletion is \
                          permanent; get IDs from todo_list first."
                .into(),
            parameters: json!({
                "ids": {
                    "type": "array",
                    "description": "Array of TODO IDs to delete",
                    "items": {"type": "string"}
                }
            }),
            required: vec!["ids".into()],
        }
    }

    async fn run(&self, _ctx: &ToolCtx, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: TodoDeleteParams = match serde_json::from_str(&call.input) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResponse::error(format!("error parsing parameters: {e}"))),
        };
        if params.ids.is_empty() {
            return Ok(ToolResponse::error("ids array cannot be empty"));
        }

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for id in params.ids {
            match self.todos.delete(&id) {
                Ok(true) => results.push(format!("Deleted TODO with ID: {id}")),
                Ok(false) => errors.push(format!("TODO {id} not found")),
                Err(e) => errors.push(format!("failed to delete TODO {id}: {e}")),
            }
        }
        Ok(combine(results, errors))
    }
}

fn combine(results: Vec<String>, errors: Vec<String>) -> ToolResponse {
    let mut out = results.join("\n");
    if !errors.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\nErrors:\n");
        }
        out.push_str(&errors.join("\n"));
    }
    if results.is_empty() && !out.is_empty() && !errors.is_empty() {
        ToolResponse::error(out)
    } else {
        ToolResponse::text(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionService;
    use crate::services::{EventBroker, TodoService};
    use crate::store::Store;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn fixture() -> (TodoService, ToolCtx, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = {
            let conn = store.conn();
            crate::store::sessions::create(&conn, "t", None).unwrap()
        };
        let broker = EventBroker::new();
        let todos = TodoService::new(store);
        let ctx = ToolCtx::new(
            session.id.clone(),
            "msg_1".into(),
            CancellationToken::new(),
            Arc::new(PermissionService::new(broker, false)),
        );
        (todos, ctx, session.id)
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
    async fn write_then_list_then_delete() {
        let (todos, ctx, session_id) = fixture();
        let write = TodoWriteTool::new(todos.clone());
        let list = TodoListTool::new(todos.clone());
        let delete = TodoDeleteTool::new(todos.clone());

        let resp = write
            .run(
                &ctx,
                call(serde_json::json!({
                    "todos": [
                        {"content": "write tests", "status": "pending"},
                        {"content": "ship", "status": "in_progress"}
                    ]
                })),
            )
            .await
            .unwrap();
        assert!(!resp.is_error, "{}", resp.content);

        let resp = list
            .run(&ctx, call(serde_json::json!({"filter_status": "pending"})))
            .await
            .unwrap();
        assert!(resp.content.contains("write tests"));
        assert!(!resp.content.contains("ship"));

        let stored = todos.list(&session_id, None).unwrap();
        assert_eq!(stored.len(), 2);

        let resp = delete
            .run(&ctx, call(serde_json::json!({"ids": [stored[0].id]})))
            .await
            .unwrap();
        assert!(!resp.is_error);
        assert_eq!(todos.list(&session_id, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_params_are_tool_responses_not_errors() {
        let (todos, ctx, _) = fixture();
        let write = TodoWriteTool::new(todos);
        let resp = write.run(&ctx, call(serde_json::json!({"nope": 1}))).await.unwrap();
        assert!(resp.is_error);
        assert!(resp.content.contains("error parsing parameters"));
    }

    #[tokio::test]
    async fn invalid_status_is_reported() {
        let (todos, ctx, _) = fixture();
        let write = TodoWriteTool::new(todos);
        let resp = write
            .run(
                &ctx,
                call(serde_json::json!({"todos": [{"content": "x", "status": "later"}]})),
            )
            .await
            .unwrap();
        assert!(resp.is_error);
        assert!(resp.content.contains("invalid status"));
    }
}
