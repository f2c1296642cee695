use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crush_shared::instance::Instance as InstanceSpec;

use super::ServerState;
use crate::error::Result;

pub async fn list(State(state): State<ServerState>) -> Json<Vec<InstanceSpec>> {
    Json(state.instances.list())
}

pub async fn create(
    State(state): State<ServerState>,
    Json(spec): Json<InstanceSpec>,
) -> Result<Json<InstanceSpec>> {
    Ok(Json(state.instances.create(spec)?))
}

pub async fn get_one(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceSpec>> {
    Ok(Json(state.instances.get(&id)?.to_spec()))
}

pub async fn delete_one(State(state): State<ServerState>, Path(id): Path<String>) -> StatusCode {
    state.instances.delete(&id);
    StatusCode::OK
}

pub async fn config(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let instance = state.instances.get(&id)?;
    let value = serde_json::to_value(instance.app.config())
        .map_err(|e| crate::error::Error::internal(e.to_string()))?;
    Ok(Json(value))
}
