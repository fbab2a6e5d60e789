//! Node Dispatcher
//!
//! Runs a named step on one node and reports its outcome.
//!
//! ## Responsibilities
//! - **Local invocation**: the orchestrating node calls its own registry in-process.
//! - **Remote invocation**: any other node is resolved through the peer table and
//!   reached over a [`StepTransport`] with a per-call timeout.
//! - **Failure classification**: a step that ran and failed is a `Step` failure;
//!   anything that leaves the node's outcome unknown is a `Transport` failure.

use super::context::TxnCtx;
use super::protocol::*;
use super::registry::StepRegistry;
use crate::error::FailureKind;
use crate::peer::store::PeerStore;
use crate::peer::types::{NodeId, PeerInfo};
use crate::store::SharedStore;

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Why a node did not produce a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeError {
    pub kind: FailureKind,
    pub message: String,
}

impl InvokeError {
    pub fn step(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Step,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            message: message.into(),
        }
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Carries a step request to a remote node.
///
/// An `Err` means the request or its reply was lost; a step that ran and
/// failed comes back as `Ok` with `ok == false`.
#[async_trait]
pub trait StepTransport: Send + Sync {
    async fn send(
        &self,
        peer: &PeerInfo,
        request: &StepRequest,
        timeout: Duration,
    ) -> Result<StepResponse, String>;
}

/// Step RPC over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepTransport for HttpTransport {
    async fn send(
        &self,
        peer: &PeerInfo,
        request: &StepRequest,
        timeout: Duration,
    ) -> Result<StepResponse, String> {
        let addr = peer
            .rpc_addr()
            .ok_or_else(|| format!("peer {} has no address", peer.id))?;
        let url = format!("http://{}{}", addr, ENDPOINT_TXN_STEP);

        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            return Err(format!("{} answered {}", addr, resp.status()));
        }

        resp.json::<StepResponse>().await.map_err(|e| e.to_string())
    }
}

/// Runs `request` against the local registry.
///
/// The step executes on its own task, so a panicking step becomes a failed
/// response instead of taking the caller down. Shared by in-process dispatch
/// and the step RPC handler.
pub async fn execute_step(
    registry: &StepRegistry,
    store: &SharedStore,
    request: StepRequest,
) -> StepResponse {
    let step = match registry.lookup(&request.step) {
        Ok(step) => step,
        Err(e) => {
            tracing::error!("{}", e);
            return StepResponse::failure(e.to_string());
        }
    };

    let base = request.ctx;
    let ctx = TxnCtx::from_snapshot(base.clone(), store.clone());
    let span = ctx.logger().clone();

    span.in_scope(|| tracing::debug!("Running step {}", request.step));
    let outcome = tokio::spawn(step(ctx.clone()).instrument(span.clone())).await;

    match outcome {
        Ok(Ok(())) => StepResponse::success(ctx.fragment_since(&base)),
        Ok(Err(e)) => {
            span.in_scope(|| tracing::warn!("Step {} failed: {:#}", request.step, e));
            StepResponse::failure(format!("{:#}", e))
        }
        Err(join_err) => {
            let message = match join_err.try_into_panic() {
                Ok(payload) => format!(
                    "step {} panicked: {}",
                    request.step,
                    panic_message(&*payload)
                ),
                Err(_) => format!("step {} was cancelled", request.step),
            };
            span.in_scope(|| tracing::error!("{}", message));
            StepResponse::failure(message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

pub struct Dispatcher {
    local_id: NodeId,
    registry: Arc<StepRegistry>,
    store: SharedStore,
    peers: PeerStore,
    transport: Arc<dyn StepTransport>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        local_id: NodeId,
        registry: Arc<StepRegistry>,
        store: SharedStore,
        transport: Arc<dyn StepTransport>,
        call_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            registry,
            peers: PeerStore::new(store.clone()),
            store,
            transport,
            call_timeout,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Invokes `step` on `node` and returns the fragment of context it produced.
    pub async fn invoke(
        &self,
        node: NodeId,
        step: &str,
        snapshot: CtxSnapshot,
    ) -> Result<CtxFragment, InvokeError> {
        let request = StepRequest {
            step: step.to_string(),
            ctx: snapshot,
        };

        let response = if node == self.local_id {
            tokio::time::timeout(
                self.call_timeout,
                execute_step(&self.registry, &self.store, request),
            )
            .await
            .map_err(|_| {
                InvokeError::transport(format!("no reply within {:?}", self.call_timeout))
            })?
        } else {
            let peer = self.peers.get_peer(&node).await.map_err(|e| {
                InvokeError::transport(format!("cannot resolve node {}: {}", node, e))
            })?;

            tracing::trace!("Sending step {} to {} ({})", step, peer.name, node);

            match tokio::time::timeout(
                self.call_timeout,
                self.transport.send(&peer, &request, self.call_timeout),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(InvokeError::transport(e)),
                Err(_) => {
                    return Err(InvokeError::transport(format!(
                        "no reply within {:?}",
                        self.call_timeout
                    )));
                }
            }
        };

        if response.ok {
            Ok(response.fragment.unwrap_or_default())
        } else {
            Err(InvokeError::step(
                response
                    .error
                    .unwrap_or_else(|| format!("step {} failed", step)),
            ))
        }
    }
}
