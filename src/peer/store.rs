//! Peer records kept in the replicated store, one entry per member under
//! `clusterd/peers/<uuid>`.

use super::types::{NodeId, PeerInfo};
use crate::error::{StoreError, StoreResult};
use crate::store::SharedStore;

pub const PEER_PREFIX: &str = "clusterd/peers/";

#[derive(Clone)]
pub struct PeerStore {
    store: SharedStore,
}

impl PeerStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn key(id: &NodeId) -> String {
        format!("{}{}", PEER_PREFIX, id)
    }

    pub async fn add_or_update_peer(&self, peer: &PeerInfo) -> StoreResult<()> {
        let json = serde_json::to_string(peer)?;
        self.store.put(&Self::key(&peer.id), json).await?;
        tracing::debug!("Stored peer {} ({})", peer.name, peer.id);
        Ok(())
    }

    pub async fn get_peer(&self, id: &NodeId) -> StoreResult<PeerInfo> {
        let key = Self::key(id);
        match self.store.get(&key).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound(key)),
        }
    }

    pub async fn delete_peer(&self, id: &NodeId) -> StoreResult<bool> {
        self.store.delete(&Self::key(id)).await
    }

    /// Lists every decodable peer. Undecodable entries are logged and skipped.
    pub async fn get_peers(&self) -> StoreResult<Vec<PeerInfo>> {
        let entries = self.store.get_prefix(PEER_PREFIX).await?;
        let mut peers = Vec::with_capacity(entries.len());
        for kv in entries {
            match serde_json::from_str::<PeerInfo>(&kv.value) {
                Ok(peer) => peers.push(peer),
                Err(e) => {
                    tracing::error!("Failed to unmarshal peer {}: {}", kv.key, e);
                }
            }
        }
        Ok(peers)
    }

    /// Finds the peer serving on `addr`. A bare host matches any port.
    pub async fn get_peer_id_by_addr(&self, addr: &str) -> StoreResult<NodeId> {
        let peers = self.get_peers().await?;
        peers
            .iter()
            .find(|peer| {
                peer.name == addr
                    || peer.addresses.iter().any(|candidate| {
                        candidate == addr
                            || candidate
                                .rsplit_once(':')
                                .map(|(host, _)| host == addr)
                                .unwrap_or(false)
                    })
            })
            .map(|peer| peer.id)
            .ok_or_else(|| StoreError::NotFound(format!("peer with address {}", addr)))
    }
}
