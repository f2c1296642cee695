//! The versioned `/v1` REST surface.

mod agent;
mod events;
mod instances;
mod permissions;
mod sessions;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Notify;
use tracing::info;

use crush_shared::instance::ServerControl;
use crush_shared::version::VersionInfo;

use crate::error::{Error, Result};
use crate::instances::InstanceManager;

#[derive(Clone)]
pub struct ServerState {
    pub instances: Arc<InstanceManager>,
    pub shutdown: Arc<Notify>,
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/version", get(version))
        .route("/v1/config", get(global_config))
        .route("/v1/control", post(control))
        .route("/v1/instances", get(instances::list).post(instances::create))
        .route(
            "/v1/instances/{id}",
            get(instances::get_one).delete(instances::delete_one),
        )
        .route("/v1/instances/{id}/config", get(instances::config))
        .route("/v1/instances/{id}/events", get(events::stream))
        .route(
            "/v1/instances/{id}/sessions",
            get(sessions::list).post(sessions::create),
        )
        .route("/v1/instances/{id}/sessions/{sid}", get(sessions::get_one))
        .route(
            "/v1/instances/{id}/sessions/{sid}/messages",
            get(sessions::messages),
        )
        .route(
            "/v1/instances/{id}/sessions/{sid}/history",
            get(sessions::history),
        )
        .route("/v1/instances/{id}/agent", get(agent::info).post(agent::run))
        .route(
            "/v1/instances/{id}/agent/update",
            post(agent::update_model),
        )
        .route(
            "/v1/instances/{id}/agent/sessions/{sid}",
            get(agent::session),
        )
        .route(
            "/v1/instances/{id}/agent/sessions/{sid}/cancel",
            post(agent::cancel),
        )
        .route(
            "/v1/instances/{id}/agent/sessions/{sid}/prompts/queued",
            get(agent::queued_prompts),
        )
        .route(
            "/v1/instances/{id}/agent/sessions/{sid}/prompts/clear",
            post(agent::clear_prompts),
        )
        .route(
            "/v1/instances/{id}/agent/sessions/{sid}/summarize",
            post(agent::summarize),
        )
        .route(
            "/v1/instances/{id}/permissions/skip",
            get(permissions::get_skip).post(permissions::set_skip),
        )
        .route(
            "/v1/instances/{id}/permissions/grant",
            post(permissions::grant),
        )
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn version() -> Json<VersionInfo> {
    Json(VersionInfo::current())
}

async fn global_config() -> Result<Json<serde_json::Value>> {
    Ok(Json(crush_core::config::global_config()?))
}

async fn control(
    State(state): State<ServerState>,
    Json(req): Json<ServerControl>,
) -> Result<StatusCode> {
    match req.command.as_str() {
        "shutdown" => {
            info!("shutdown requested over the control endpoint");
            state.shutdown.notify_one();
            Ok(StatusCode::OK)
        }
        other => Err(Error::bad_request(format!("unknown command: {other}"))),
    }
}
