//! Peer Bootstrap Service
//!
//! Operations a node runs on behalf of a peer that is joining or leaving the
//! cluster. They sit outside the transaction engine: reconfiguring store
//! membership touches the store the resource lock lives in, so none of this
//! can take that lock or roll back through it.
//!
//! ## Responsibilities
//! - **Add validation**: refuse to join when this node is too old or already
//!   manages volumes of its own.
//! - **Delete validation**: hook for removal checks; accepts for now.
//! - **Store reconfiguration**: restart the local store member under new
//!   membership, or under a standalone one when this node is removed. Steps
//!   run in order and the first failure is reported; nothing is reversed.

use super::store::PeerStore;
use super::types::*;
use crate::error::StoreResult;
use crate::store::SharedStore;
use crate::store::memory::MemoryStore;
use crate::volume::store::VolumeStore;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Lowest op-version this node can cluster with.
pub const MIN_OP_VERSION: u32 = 40000;

/// File under the state directory the store membership is persisted to.
pub const STORE_CONFIG_FILE: &str = "store.toml";

/// Lifecycle of the local replicated-store participant.
#[async_trait]
pub trait StoreMember: Send + Sync {
    async fn stop(&self) -> Result<()>;

    /// Membership the member would restart with if nothing changed.
    async fn current_config(&self) -> Result<StoreMemberConfig>;

    /// Stops the member and removes its local data.
    async fn destroy(&self) -> Result<()>;

    async fn start(&self, config: StoreMemberConfig) -> Result<()>;

    /// Saves `config` so a restarted daemon rejoins with it.
    async fn persist_config(&self, config: &StoreMemberConfig) -> Result<()>;
}

/// Store member backed by the in-process [`MemoryStore`] this node hosts.
pub struct LocalStoreMember {
    store: Arc<MemoryStore>,
    state_dir: PathBuf,
    config: Mutex<StoreMemberConfig>,
    running: AtomicBool,
}

impl LocalStoreMember {
    pub fn new(
        store: Arc<MemoryStore>,
        state_dir: impl Into<PathBuf>,
        config: StoreMemberConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            state_dir: state_dir.into(),
            config: Mutex::new(config),
            running: AtomicBool::new(true),
        })
    }

    /// Standalone single-member configuration for a node called `name`.
    pub fn standalone_config(name: &str, store_peer_addr: &str) -> StoreMemberConfig {
        StoreMemberConfig {
            name: name.to_string(),
            dir: format!("{}.store", name),
            initial_cluster: format!("{}={}", name, store_peer_addr),
            cluster_state: ClusterState::New,
        }
    }

    /// Reads the persisted configuration, if any.
    pub async fn load_persisted(state_dir: &Path) -> Result<Option<StoreMemberConfig>> {
        let path = state_dir.join(STORE_CONFIG_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let config = toml::from_str(&text)
                    .with_context(|| format!("invalid store config in {}", path.display()))?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub async fn config(&self) -> StoreMemberConfig {
        self.config.lock().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreMember for LocalStoreMember {
    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Local store member stopped");
        Ok(())
    }

    async fn current_config(&self) -> Result<StoreMemberConfig> {
        match Self::load_persisted(&self.state_dir).await? {
            Some(config) => Ok(config),
            None => Ok(self.config().await),
        }
    }

    async fn destroy(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.store.clear();

        let dir = self.state_dir.join(&self.config.lock().await.dir);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", dir.display()));
            }
        }

        tracing::info!("Local store member destroyed");
        Ok(())
    }

    async fn start(&self, config: StoreMemberConfig) -> Result<()> {
        let dir = self.state_dir.join(&config.dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        tracing::info!(
            "Local store member {} started ({:?}, cluster {})",
            config.name,
            config.cluster_state,
            config.initial_cluster
        );
        *self.config.lock().await = config;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn persist_config(&self, config: &StoreMemberConfig) -> Result<()> {
        let path = self.state_dir.join(STORE_CONFIG_FILE);
        let text = toml::to_string(config)?;
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

pub struct PeerService {
    local: PeerInfo,
    op_version: u32,
    peers: PeerStore,
    volumes: VolumeStore,
    member: Arc<dyn StoreMember>,
}

impl PeerService {
    pub fn new(
        local: PeerInfo,
        op_version: u32,
        store: SharedStore,
        member: Arc<dyn StoreMember>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            op_version,
            peers: PeerStore::new(store.clone()),
            volumes: VolumeStore::new(store),
            member,
        })
    }

    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    /// Writes this node's own peer record.
    pub async fn add_self_details(&self) -> StoreResult<()> {
        self.peers.add_or_update_peer(&self.local).await
    }

    pub async fn validate_add(&self, req: PeerAddRequest) -> PeerAddResponse {
        let mut reason = None;

        if self.op_version < MIN_OP_VERSION {
            reason = Some(format!(
                "clusterd instance running on {} is not compatible",
                req.name
            ));
        }

        let volumes = match self.volumes.get_volumes().await {
            Ok(volumes) => volumes,
            Err(e) => {
                tracing::warn!("Could not list volumes while validating add: {}", e);
                Vec::new()
            }
        };
        if !volumes.is_empty() {
            reason = Some(format!("peer {} already has existing volumes", req.name));
        }

        if let Some(reason) = &reason {
            tracing::warn!("Rejecting add request from {}: {}", req.name, reason);
        }

        PeerAddResponse {
            accepted: reason.is_none(),
            reason,
            id: self.local.id,
            name: self.local.name.clone(),
            store_peer_addr: self.local.store_peer_addr.clone(),
        }
    }

    pub async fn validate_delete(&self, req: PeerDeleteRequest) -> PeerGenericResponse {
        tracing::debug!("Validating removal of {}", req.id);
        PeerGenericResponse::accept()
    }

    /// Restarts the local store member under the membership in `req`.
    pub async fn store_config(&self, req: StoreConfigRequest) -> PeerGenericResponse {
        match self.reconfigure(&req).await {
            Ok(()) => {
                tracing::info!(
                    "Store reconfigured ({})",
                    if req.delete_peer { "left cluster" } else { "joined cluster" }
                );
                PeerGenericResponse::accept()
            }
            Err(e) => {
                tracing::error!("Store reconfiguration failed: {:#}", e);
                PeerGenericResponse::reject(e.to_string())
            }
        }
    }

    async fn reconfigure(&self, req: &StoreConfigRequest) -> Result<()> {
        self.member.stop().await.context("error stopping local store member")?;

        // A removed node ignores whatever membership it persisted while joined
        let config = if req.delete_peer {
            LocalStoreMember::standalone_config(&self.local.name, &self.local.store_peer_addr)
        } else {
            let mut config = self
                .member
                .current_config()
                .await
                .context("could not fetch store configuration")?;
            config.initial_cluster = req.initial_cluster.clone();
            config.cluster_state = req.cluster_state;
            config.name = req.store_name.clone();
            config.dir = format!("{}.store", config.name);
            config
        };

        self.member
            .destroy()
            .await
            .context("error destroying local store member")?;

        self.member
            .start(config.clone())
            .await
            .context("could not start local store member")?;

        self.member
            .persist_config(&config)
            .await
            .context("error storing store configuration")?;

        if req.delete_peer {
            // Back to a standalone single-node cluster
            self.add_self_details()
                .await
                .context("could not record local peer details")?;
        }

        Ok(())
    }
}
