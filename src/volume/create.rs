use super::steps::{CTX_REQ, CTX_VOLAUTH, CTX_VOLINFO, VOL_CREATE};
use super::store::VolumeStore;
use super::types::*;
use crate::error::{StoreError, VolumeError, VolumeResult};
use crate::peer::store::PeerStore;
use crate::peer::types::NodeId;
use crate::transaction::{Orchestrator, Txn, TxnBuilder};

use std::sync::Arc;
use uuid::Uuid;

pub fn validate_request(req: &VolCreateRequest) -> VolumeResult<()> {
    if req.name.is_empty() {
        tracing::error!("Volume name is empty");
        return Err(VolumeError::EmptyName);
    }
    if req.bricks.is_empty() {
        tracing::error!("Brick list of volume {} is empty", req.name);
        return Err(VolumeError::EmptyBrickList);
    }
    Ok(())
}

/// Resolves the host part of a brick to the peer hosting it.
async fn resolve_host(peers: &PeerStore, host: &str) -> VolumeResult<NodeId> {
    if let Ok(id) = host.parse::<NodeId>() {
        return Ok(id);
    }
    match peers.get_peer_id_by_addr(host).await {
        Ok(id) => Ok(id),
        Err(StoreError::NotFound(_)) => Err(VolumeError::UnknownHost(host.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Nodes a volume create touches, one entry per brick.
pub async fn nodes_for_vol_create(
    peers: &PeerStore,
    req: &VolCreateRequest,
) -> VolumeResult<Vec<NodeId>> {
    let mut nodes = Vec::with_capacity(req.bricks.len());
    for brick in &req.bricks {
        let (host, _) = parse_brick(brick)?;
        nodes.push(resolve_host(peers, host).await?);
    }
    Ok(nodes)
}

/// Builds the volume entry, with every brick bound to its peer.
pub async fn create_volinfo(peers: &PeerStore, req: &VolCreateRequest) -> VolumeResult<Volinfo> {
    let mut bricks = Vec::with_capacity(req.bricks.len());
    for brick in &req.bricks {
        let (host, path) = parse_brick(brick)?;
        let node_id = resolve_host(peers, host).await?;
        let hostname = match peers.get_peer(&node_id).await {
            Ok(peer) => peer.name,
            Err(StoreError::NotFound(_)) => return Err(VolumeError::UnknownHost(host.to_string())),
            Err(e) => return Err(e.into()),
        };
        bricks.push(Brickinfo {
            node_id,
            hostname,
            path: path.to_string(),
        });
    }

    Ok(Volinfo {
        id: Uuid::new_v4(),
        name: req.name.clone(),
        bricks,
    })
}

/// Creates a volume across every node hosting one of its bricks.
pub async fn create_volume(
    orchestrator: &Arc<Orchestrator>,
    req: VolCreateRequest,
) -> VolumeResult<Volinfo> {
    validate_request(&req)?;

    let store = orchestrator.dispatcher().store().clone();
    let peers = PeerStore::new(store.clone());

    if VolumeStore::new(store).volume_exists(&req.name).await {
        return Err(VolumeError::Exists(req.name));
    }

    let nodes = nodes_for_vol_create(&peers, &req).await?;
    let vol = create_volinfo(&peers, &req).await?;

    let reqid = Uuid::new_v4().to_string();
    let mut txn = orchestrator.new_txn(
        TxnBuilder::with_step_set(req.name.clone(), nodes, VOL_CREATE)
            .reqid(reqid)
            .log_field("volume", req.name.clone()),
    )?;

    let result = run_create(&mut txn, &req, &vol).await;
    txn.cleanup().await;
    result?;

    let created: Volinfo = txn.ctx.get(CTX_VOLINFO)?;
    txn.ctx
        .logger()
        .in_scope(|| tracing::info!("New volume {} created", created.name));
    Ok(created)
}

async fn run_create(
    txn: &mut Txn,
    req: &VolCreateRequest,
    vol: &Volinfo,
) -> VolumeResult<()> {
    txn.ctx.set(CTX_REQ, req)?;
    txn.ctx.set(CTX_VOLINFO, vol)?;
    txn.ctx.set(CTX_VOLAUTH, &VolAuth::generate())?;

    if let Err(e) = txn.run().await {
        txn.ctx
            .logger()
            .in_scope(|| tracing::error!("Volume create transaction failed: {}", e));
        return Err(e.into());
    }
    Ok(())
}
