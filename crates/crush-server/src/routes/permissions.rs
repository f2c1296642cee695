use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crush_shared::{PermissionAction, PermissionGrant, PermissionSkipRequest};

use super::ServerState;
use crate::error::Result;

pub async fn get_skip(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<PermissionSkipRequest>> {
    let instance = state.instances.get(&id)?;
    Ok(Json(PermissionSkipRequest {
        skip: instance.app.permissions.skip_requests(),
    }))
}

pub async fn set_skip(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(req): Json<PermissionSkipRequest>,
) -> Result<StatusCode> {
    let instance = state.instances.get(&id)?;
    instance.app.permissions.set_skip_requests(req.skip);
    Ok(StatusCode::OK)
}

/// Resolves a pending permission request the way the user chose.
pub async fn grant(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(req): Json<PermissionGrant>,
) -> Result<StatusCode> {
    let instance = state.instances.get(&id)?;
    let permissions = &instance.app.permissions;
    match req.action {
        PermissionAction::Allow => permissions.grant(&req.permission),
        PermissionAction::AllowSession => permissions.grant_persistent(&req.permission),
        PermissionAction::Deny => permissions.deny(&req.permission),
    }
    Ok(StatusCode::OK)
}
