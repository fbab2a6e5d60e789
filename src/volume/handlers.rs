use super::create::create_volume;
use super::types::{VolCreateRequest, VolCreateResponse};
use crate::error::{ErrorKind, VolumeError};
use crate::transaction::Orchestrator;

use axum::{Extension, Json, Router, http::StatusCode, routing::post};
use std::sync::Arc;

pub const ENDPOINT_VOLUMES: &str = "/v1/volumes";

pub fn volume_routes(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route(ENDPOINT_VOLUMES, post(handle_volume_create))
        .layer(Extension(orchestrator))
}

pub async fn handle_volume_create(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Json(req): Json<VolCreateRequest>,
) -> (StatusCode, Json<VolCreateResponse>) {
    tracing::info!("Received create request for volume {}", req.name);

    match create_volume(&orchestrator, req).await {
        Ok(vol) => (
            StatusCode::CREATED,
            Json(VolCreateResponse {
                ok: true,
                volume: Some(vol),
                error: None,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(VolCreateResponse {
                ok: false,
                volume: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

fn status_for(err: &VolumeError) -> StatusCode {
    match err {
        VolumeError::EmptyName
        | VolumeError::EmptyBrickList
        | VolumeError::InvalidBrick(_)
        | VolumeError::UnknownHost(_) => StatusCode::BAD_REQUEST,
        VolumeError::Exists(_) => StatusCode::CONFLICT,
        VolumeError::Txn(txn) => match txn.kind() {
            ErrorKind::LockContention => StatusCode::CONFLICT,
            ErrorKind::Step => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Transport => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        VolumeError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
