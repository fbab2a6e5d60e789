use super::KvStore;
use super::memory::MemoryStore;
use super::protocol::*;
use crate::error::StoreError;

use axum::{
    Extension, Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use std::sync::Arc;
use std::time::Duration;

/// Routes serving a hosted store to the rest of the cluster.
pub fn store_routes(store: Arc<MemoryStore>) -> Router {
    Router::new()
        .route(ENDPOINT_STORE_PUT, post(handle_store_put))
        .route(ENDPOINT_STORE_GET, post(handle_store_get))
        .route(ENDPOINT_STORE_DELETE, post(handle_store_delete))
        .route(ENDPOINT_STORE_PREFIX, post(handle_store_prefix))
        .route(ENDPOINT_LEASE_CREATE, post(handle_lease_create))
        .route(ENDPOINT_LEASE_KEEPALIVE, post(handle_lease_keepalive))
        .route(ENDPOINT_LEASE_REVOKE, post(handle_lease_revoke))
        .layer(Extension(store))
}

fn store_failure(e: StoreError) -> Response {
    tracing::error!("Hosted store request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(StoreErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

pub async fn handle_store_put(
    Extension(store): Extension<Arc<MemoryStore>>,
    Json(req): Json<PutRequest>,
) -> Response {
    match store.put(&req.key, req.value).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse { ok: true })).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_store_get(
    Extension(store): Extension<Arc<MemoryStore>>,
    Json(req): Json<KeyRequest>,
) -> Response {
    match store.get(&req.key).await {
        Ok(value) => (StatusCode::OK, Json(GetResponse { value })).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_store_delete(
    Extension(store): Extension<Arc<MemoryStore>>,
    Json(req): Json<KeyRequest>,
) -> Response {
    match store.delete(&req.key).await {
        Ok(deleted) => (StatusCode::OK, Json(DeleteResponse { deleted })).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_store_prefix(
    Extension(store): Extension<Arc<MemoryStore>>,
    Json(req): Json<KeyRequest>,
) -> Response {
    match store.get_prefix(&req.key).await {
        Ok(entries) => (StatusCode::OK, Json(PrefixResponse { entries })).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_lease_create(
    Extension(store): Extension<Arc<MemoryStore>>,
    Json(req): Json<LeaseCreateRequest>,
) -> Response {
    if req.ttl_ms == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(StoreErrorResponse {
                error: "lease ttl must be positive".to_string(),
            }),
        )
            .into_response();
    }

    match store
        .create_with_lease(&req.key, req.value, Duration::from_millis(req.ttl_ms))
        .await
    {
        Ok(lease) => {
            tracing::debug!("Lease on {} -> {:?}", req.key, lease);
            (StatusCode::OK, Json(LeaseCreateResponse { lease })).into_response()
        }
        Err(e) => store_failure(e),
    }
}

pub async fn handle_lease_keepalive(
    Extension(store): Extension<Arc<MemoryStore>>,
    Json(req): Json<LeaseRequest>,
) -> Response {
    match store.keep_alive(req.lease).await {
        Ok(alive) => (StatusCode::OK, Json(KeepAliveResponse { alive })).into_response(),
        Err(e) => store_failure(e),
    }
}

pub async fn handle_lease_revoke(
    Extension(store): Extension<Arc<MemoryStore>>,
    Json(req): Json<LeaseRequest>,
) -> Response {
    match store.revoke(req.lease).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse { ok: true })).into_response(),
        Err(e) => store_failure(e),
    }
}
