use crate::error::VolumeError;
use crate::peer::types::NodeId;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client request to create a volume.
///
/// Bricks are written `<peer-uuid>:<path>`, `<host>:<path>` or
/// `<host>:<port>:<path>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolCreateRequest {
    pub name: String,
    pub bricks: Vec<String>,
    /// Allows bricks on the filesystem root.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Brickinfo {
    pub node_id: NodeId,
    pub hostname: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volinfo {
    pub id: Uuid,
    pub name: String,
    pub bricks: Vec<Brickinfo>,
}

impl Volinfo {
    /// Bricks hosted on `node`.
    pub fn bricks_on(&self, node: NodeId) -> impl Iterator<Item = &Brickinfo> {
        self.bricks.iter().filter(move |b| b.node_id == node)
    }
}

/// Trusted credentials brick processes use to authenticate clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolAuth {
    pub username: String,
    pub password: String,
}

impl VolAuth {
    pub fn generate() -> Self {
        Self {
            username: Uuid::new_v4().to_string(),
            password: Uuid::new_v4().to_string(),
        }
    }
}

/// Splits a brick string into its host part and absolute path.
///
/// The host part may itself carry a port (`10.0.0.1:24007:/bricks/b1`).
pub fn parse_brick(brick: &str) -> Result<(&str, &str), VolumeError> {
    let invalid = || VolumeError::InvalidBrick(brick.to_string());
    let split = brick.find(":/").ok_or_else(invalid)?;
    let (host, path) = (&brick[..split], &brick[split + 1..]);
    if host.is_empty() || path.is_empty() {
        return Err(invalid());
    }
    Ok((host, path))
}

/// Reply of the volume create endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolCreateResponse {
    pub ok: bool,
    pub volume: Option<Volinfo>,
    pub error: Option<String>,
}
