use super::client::*;
use super::service::PeerService;
use super::types::*;

use axum::{Extension, Json, Router, http::StatusCode, routing::post};
use std::sync::Arc;

pub fn peer_routes(service: Arc<PeerService>) -> Router {
    Router::new()
        .route(ENDPOINT_PEER_VALIDATE_ADD, post(handle_validate_add))
        .route(ENDPOINT_PEER_VALIDATE_DELETE, post(handle_validate_delete))
        .route(ENDPOINT_PEER_STORE_CONFIG, post(handle_store_config))
        .layer(Extension(service))
}

pub async fn handle_validate_add(
    Extension(service): Extension<Arc<PeerService>>,
    Json(req): Json<PeerAddRequest>,
) -> (StatusCode, Json<PeerAddResponse>) {
    tracing::info!("Received add validation request from {}", req.name);
    (StatusCode::OK, Json(service.validate_add(req).await))
}

pub async fn handle_validate_delete(
    Extension(service): Extension<Arc<PeerService>>,
    Json(req): Json<PeerDeleteRequest>,
) -> (StatusCode, Json<PeerGenericResponse>) {
    (StatusCode::OK, Json(service.validate_delete(req).await))
}

// Rejections are reported in the body, the call itself succeeded
pub async fn handle_store_config(
    Extension(service): Extension<Arc<PeerService>>,
    Json(req): Json<StoreConfigRequest>,
) -> (StatusCode, Json<PeerGenericResponse>) {
    tracing::info!(
        "Received store reconfiguration request (delete_peer: {})",
        req.delete_peer
    );
    (StatusCode::OK, Json(service.store_config(req).await))
}
