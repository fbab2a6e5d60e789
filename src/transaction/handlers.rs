use super::dispatcher::execute_step;
use super::protocol::*;
use super::registry::StepRegistry;
use crate::store::SharedStore;

use axum::{Extension, Json, Router, http::StatusCode, routing::post};
use std::sync::Arc;

/// What the step endpoint needs to run a step for a remote orchestrator.
pub struct StepEndpoint {
    pub registry: Arc<StepRegistry>,
    pub store: SharedStore,
}

pub fn txn_routes(registry: Arc<StepRegistry>, store: SharedStore) -> Router {
    Router::new()
        .route(ENDPOINT_TXN_STEP, post(handle_txn_step))
        .layer(Extension(Arc::new(StepEndpoint { registry, store })))
}

/// A failing step still answers 200 with `ok = false`; only a lost request
/// or a non-2xx reply is treated as a transport failure by the caller.
pub async fn handle_txn_step(
    Extension(endpoint): Extension<Arc<StepEndpoint>>,
    Json(req): Json<StepRequest>,
) -> (StatusCode, Json<StepResponse>) {
    tracing::debug!(
        "Received step {} for transaction {} (reqid {})",
        req.step,
        req.ctx.txn_id,
        req.ctx.reqid
    );

    let response = execute_step(&endpoint.registry, &endpoint.store, req).await;
    (StatusCode::OK, Json(response))
}
