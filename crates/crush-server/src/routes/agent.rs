use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crush_shared::{AgentInfo, AgentMessage, AgentSession};

use super::ServerState;
use crate::error::{Error, Result};

pub async fn info(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<AgentInfo>> {
    let instance = state.instances.get(&id)?;
    Ok(Json(AgentInfo {
        is_busy: instance.app.agent.is_busy(),
        model: instance.app.agent.model().summary(),
    }))
}

/// Submits a prompt. The turn runs asynchronously; its lifecycle is observed
/// on the event stream, so a 200 here only means "accepted".
pub async fn run(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(msg): Json<AgentMessage>,
) -> Result<StatusCode> {
    let instance = state.instances.get(&id)?;
    instance
        .app
        .agent
        .run(&msg.session_id, msg.prompt, msg.attachments)
        .await
        .map_err(|e| Error::internal(format!("failed to enqueue message: {e}")))?;
    Ok(StatusCode::OK)
}

pub async fn update_model(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let instance = state.instances.get(&id)?;
    instance.app.update_agent_model()?;
    Ok(StatusCode::OK)
}

pub async fn session(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<AgentSession>> {
    let instance = state.instances.get(&id)?;
    let session = instance
        .app
        .sessions
        .get(&sid)?
        .ok_or_else(|| Error::not_found("session not found"))?;
    Ok(Json(AgentSession {
        is_busy: instance.app.agent.is_session_busy(&sid),
        session,
    }))
}

pub async fn cancel(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<StatusCode> {
    let instance = state.instances.get(&id)?;
    instance.app.agent.cancel(&sid);
    Ok(StatusCode::OK)
}

pub async fn queued_prompts(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<usize>> {
    let instance = state.instances.get(&id)?;
    Ok(Json(instance.app.agent.queued_prompts(&sid)))
}

pub async fn clear_prompts(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<StatusCode> {
    let instance = state.instances.get(&id)?;
    instance.app.agent.clear_queue(&sid);
    Ok(StatusCode::OK)
}

/// Kicks off summarization; progress arrives as `summarize` agent events on
/// the stream.
pub async fn summarize(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<StatusCode> {
    let instance = state.instances.get(&id)?;
    instance
        .app
        .agent
        .summarize(&sid)
        .await
        .map_err(|e| Error::internal(format!("failed to summarize session: {e}")))?;
    Ok(StatusCode::OK)
}
