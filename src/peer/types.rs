use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identity of a cluster member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(NodeId)
    }
}

/// A peer as recorded in the store.
///
/// `addresses` are the `host:port` pairs the peer serves intra-cluster RPC on;
/// the first one is used for dispatch. `store_peer_addr` is where its store
/// member talks to the other store members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: NodeId,
    pub name: String,
    pub addresses: Vec<String>,
    pub store_peer_addr: String,
}

impl PeerInfo {
    pub fn rpc_addr(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }
}

// --- Bootstrap RPC messages ---

/// Sent to a prospective member before it is added to the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAddRequest {
    /// Name the caller knows the prospective member by.
    pub name: String,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerAddResponse {
    pub accepted: bool,
    pub reason: Option<String>,
    pub id: NodeId,
    pub name: String,
    pub store_peer_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDeleteRequest {
    pub id: NodeId,
}

/// Accept/reject reply shared by removal validation and store reconfiguration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerGenericResponse {
    pub accepted: bool,
    pub reason: Option<String>,
}

impl PeerGenericResponse {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Whether the local store member joins an existing cluster or starts one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    New,
    Existing,
}

/// Membership parameters a store member is started with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreMemberConfig {
    /// Member name, unique within the store cluster.
    pub name: String,
    /// Data directory of the member, relative to the state directory.
    pub dir: String,
    /// Comma separated `name=peer_url` pairs.
    pub initial_cluster: String,
    pub cluster_state: ClusterState,
}

/// Asks a peer to restart its store member under a new membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfigRequest {
    /// The peer is being removed and must fall back to a standalone store.
    pub delete_peer: bool,
    pub initial_cluster: String,
    pub cluster_state: ClusterState,
    pub store_name: String,
}
