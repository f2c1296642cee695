use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crush_shared::{FileRecord, Message, Session};

use super::ServerState;
use crate::error::{Error, Result};

#[derive(Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    title: String,
}

pub async fn list(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Session>>> {
    let instance = state.instances.get(&id)?;
    Ok(Json(instance.app.sessions.list()?))
}

pub async fn create(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<Session>> {
    let instance = state.instances.get(&id)?;
    Ok(Json(instance.app.sessions.create(&body.title).await?))
}

pub async fn get_one(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<Session>> {
    let instance = state.instances.get(&id)?;
    let session = instance
        .app
        .sessions
        .get(&sid)?
        .ok_or_else(|| Error::not_found("session not found"))?;
    Ok(Json(session))
}

pub async fn messages(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<Vec<Message>>> {
    let instance = state.instances.get(&id)?;
    Ok(Json(instance.app.messages.list(&sid)?))
}

/// File snapshots recorded for the session, for diff/history views.
pub async fn history(
    State(state): State<ServerState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<Vec<FileRecord>>> {
    let instance = state.instances.get(&id)?;
    Ok(Json(instance.app.files.list(&sid)?))
}
